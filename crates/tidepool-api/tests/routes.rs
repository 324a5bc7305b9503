//! Router tests: requests go through `build_router` exactly as served.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tidepool_api::build_router;
use tidepool_catalog::CatalogRegistry;
use tidepool_core::{PlatformKind, default_domain_name};
use tidepool_manage::{InitTaskTracker, ManageContext, ReadinessWaiter, ServiceLifecycle};
use tidepool_platform::{MemoryNetwork, MemoryPlatform};
use tidepool_state::StateStore;
use tower::ServiceExt;

fn router_with(platform: MemoryPlatform) -> Router {
    let ctx = ManageContext {
        region: "us-east-1".into(),
        cluster: "c1".into(),
        platform: PlatformKind::Swarm,
        zones: vec!["us-east-1a".into()],
        domain_name: default_domain_name("c1"),
        manage_url: "http://tidepool-manageserver.c1-tidepool.com:27040/".into(),
        hosted_zone_id: String::new(),
    };
    let lifecycle = ServiceLifecycle::new(
        ctx,
        Arc::new(StateStore::open_in_memory().unwrap()),
        Arc::new(platform),
        Arc::new(MemoryNetwork::new()),
        CatalogRegistry::with_defaults(),
        InitTaskTracker::new(),
        ReadinessWaiter::new(Duration::from_millis(10), Duration::from_secs(5)),
    );
    build_router(lifecycle)
}

fn router() -> Router {
    router_with(MemoryPlatform::new())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn service(name: &str) -> Value {
    json!({"region": "us-east-1", "cluster": "c1", "service_name": name})
}

fn redis_body(name: &str, shards: u64) -> Value {
    json!({
        "service": service(name),
        "resource": {"max_cpu_units": -1, "reserve_cpu_units": 0, "max_mem_mb": -1, "reserve_mem_mb": 256},
        "options": {
            "shards": shards,
            "replicas_per_shard": 1,
            "memory_cache_size_mb": 128,
            "volume_size_gb": 1
        }
    })
}

#[tokio::test]
async fn create_returns_empty_ok_then_conflict() {
    let app = router();

    let resp = app
        .clone()
        .oneshot(json_request("POST", "/v1/catalog/redis", redis_body("cache", 1)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.is_empty());

    let resp = app
        .oneshot(json_request("POST", "/v1/catalog/redis", redis_body("cache", 1)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert!(body_text(resp).await.contains("cache"));
}

#[tokio::test]
async fn get_service_exposes_decoded_user_attr() {
    let app = router();
    app.clone()
        .oneshot(json_request("POST", "/v1/catalog/redis", redis_body("cache", 1)))
        .await
        .unwrap();

    let resp = app.oneshot(get("/v1/services/cache")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let attr: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(attr["service_type"], "redis");
    assert_eq!(attr["status"], "ACTIVE");
    assert_eq!(attr["user_attr"]["memory_cache_size_mb"], 128);
}

#[tokio::test]
async fn get_service_masks_auth_pass() {
    let app = router();
    let mut body = redis_body("cache", 1);
    body["options"]["auth_pass"] = json!("hunter2");
    let resp = app
        .clone()
        .oneshot(json_request("POST", "/v1/catalog/redis", body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(get("/v1/services/cache")).await.unwrap();
    let text = body_text(resp).await;
    assert!(!text.contains("hunter2"), "{text}");
    let attr: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(attr["user_attr"]["auth_pass"], "******");
}

#[tokio::test]
async fn update_rewrites_config() {
    let app = router();
    app.clone()
        .oneshot(json_request("POST", "/v1/catalog/redis", redis_body("cache", 1)))
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/v1/catalog/redis",
            json!({"service": service("cache"), "options": {"max_memory_policy": "noeviction"}}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(get("/v1/services/cache")).await.unwrap();
    let attr: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(attr["user_attr"]["max_memory_policy"], "noeviction");
}

#[tokio::test]
async fn init_routes_report_and_complete() {
    let platform = MemoryPlatform::new();
    platform.hold_convergence(true).await;
    let app = router_with(platform);

    let resp = app
        .clone()
        .oneshot(json_request("POST", "/v1/catalog/redis", redis_body("cluster", 3)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.clone().oneshot(get("/v1/catalog/init/cluster")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let status: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(status["initialized"], false);

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/catalog/init",
            json!({"region": "us-east-1", "cluster": "c1", "service_name": "cluster"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(get("/v1/catalog/init/cluster")).await.unwrap();
    let status: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(status["initialized"], true);
}

#[tokio::test]
async fn errors_are_plain_text_with_kind_status() {
    let app = router();

    let resp = app.clone().oneshot(get("/v1/services/missing")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let resp = app
        .clone()
        .oneshot(json_request("POST", "/v1/catalog/redis", redis_body("bad", 2)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(json_request("POST", "/v1/catalog/cassandra", redis_body("db", 1)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/catalog/redis")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.contains("invalid request body"));
}

#[tokio::test]
async fn unavailable_platform_is_503() {
    let platform = MemoryPlatform::new();
    platform.set_unavailable("create_service", true).await;
    let app = router_with(platform);

    let resp = app
        .oneshot(json_request("POST", "/v1/catalog/redis", redis_body("cache", 1)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}
