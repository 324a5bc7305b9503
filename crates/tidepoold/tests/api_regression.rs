//! Daemon regression tests.
//!
//! Drives the manage API over an on-disk store the way `tidepoold` wires it,
//! including a restart between requests.

use std::path::Path;
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
use tidepool_state::{MetadataStore, StateStore};
use tower::ServiceExt;

fn router(db_path: &Path, platform: MemoryPlatform) -> Router {
    let ctx = ManageContext {
        region: "us-east-1".into(),
        cluster: "c1".into(),
        platform: PlatformKind::K8s,
        zones: vec!["us-east-1a".into(), "us-east-1b".into()],
        domain_name: default_domain_name("c1"),
        manage_url: "http://tidepool-manageserver.c1-tidepool.com:27040/".into(),
        hosted_zone_id: String::new(),
    };
    let lifecycle = ServiceLifecycle::new(
        ctx,
        Arc::new(StateStore::open(db_path).unwrap()),
        Arc::new(platform),
        Arc::new(MemoryNetwork::new()),
        CatalogRegistry::with_defaults(),
        InitTaskTracker::new(),
        ReadinessWaiter::new(Duration::from_millis(10), Duration::from_secs(5)),
    );
    build_router(lifecycle)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_redis(name: &str) -> Value {
    json!({
        "service": {"region": "us-east-1", "cluster": "c1", "service_name": name},
        "resource": {"max_cpu_units": -1, "reserve_cpu_units": 256, "max_mem_mb": -1, "reserve_mem_mb": 512},
        "options": {
            "shards": 1,
            "replicas_per_shard": 2,
            "memory_cache_size_mb": 512,
            "volume_size_gb": 5,
            "auth_pass": "secret"
        }
    })
}

#[tokio::test]
async fn service_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tidepool.redb");

    {
        let app = router(&db_path, MemoryPlatform::new());
        let resp = app
            .oneshot(post("/v1/catalog/redis", create_redis("sessions")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let app = router(&db_path, MemoryPlatform::new());
    let resp = app.oneshot(get("/v1/services/sessions")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let attr = json_body(resp).await;
    assert_eq!(attr["status"], "ACTIVE");
    assert_eq!(attr["replicas"], 2);
    assert_eq!(attr["user_attr"]["auth_pass"], "******");
    assert!(!attr.to_string().contains("secret"));
}

#[tokio::test]
async fn members_and_configs_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tidepool.redb");

    {
        let app = router(&db_path, MemoryPlatform::new());
        let resp = app
            .oneshot(post("/v1/catalog/redis", create_redis("sessions")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let store = StateStore::open(&db_path).unwrap();
    let record = store.get_service("c1", "sessions").await.unwrap();
    let members = store
        .list_service_members(&record.service_uuid)
        .await
        .unwrap();
    assert_eq!(members.len(), 2);
    let zones: Vec<_> = members.iter().map(|m| m.available_zone.as_str()).collect();
    assert!(zones.contains(&"us-east-1a"));
    assert!(zones.contains(&"us-east-1b"));

    for member in &members {
        for cfg in &member.configs {
            let file = store
                .get_config_file(&record.service_uuid, &cfg.file_id)
                .await
                .unwrap();
            assert_eq!(file.file_md5, cfg.file_md5);
        }
    }
}

#[tokio::test]
async fn check_init_on_single_shard_reports_initialized() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(&dir.path().join("tidepool.redb"), MemoryPlatform::new());

    app.clone()
        .oneshot(post("/v1/catalog/redis", create_redis("sessions")))
        .await
        .unwrap();

    let resp = app.oneshot(get("/v1/catalog/init/sessions")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let status = json_body(resp).await;
    assert_eq!(status["initialized"], true);
}

#[tokio::test]
async fn set_init_for_unknown_service_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(&dir.path().join("tidepool.redb"), MemoryPlatform::new());

    let resp = app
        .oneshot(post(
            "/v1/catalog/init",
            json!({"region": "us-east-1", "cluster": "c1", "service_name": "ghost"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_cluster_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(&dir.path().join("tidepool.redb"), MemoryPlatform::new());

    let mut body = create_redis("sessions");
    body["service"]["cluster"] = json!("other");
    let resp = app.oneshot(post("/v1/catalog/redis", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
