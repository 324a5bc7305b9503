//! End-to-end lifecycle tests against the in-memory store and platform.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tidepool_catalog::{CatalogRegistry, InitTaskSpec};
use tidepool_core::{PlatformKind, Resources, default_domain_name};
use tidepool_manage::*;
use tidepool_platform::{MemoryNetwork, MemoryPlatform, PlatformCall, TaskState};
use tidepool_state::{MetadataStore, RecordingStore, ServiceStatus, StoreOp, content_md5};

const CLUSTER: &str = "c1";
const REGION: &str = "us-east-1";

struct Harness {
    lifecycle: ServiceLifecycle,
    store: RecordingStore,
    platform: MemoryPlatform,
}

fn harness() -> Harness {
    let store = RecordingStore::in_memory().unwrap();
    let platform = MemoryPlatform::new();
    let ctx = ManageContext {
        region: REGION.into(),
        cluster: CLUSTER.into(),
        platform: PlatformKind::Ecs,
        zones: vec!["us-east-1a".into(), "us-east-1b".into(), "us-east-1c".into()],
        domain_name: default_domain_name(CLUSTER),
        manage_url: "http://tidepool-manageserver.c1-tidepool.com:27040/".into(),
        hosted_zone_id: "Z123".into(),
    };
    let lifecycle = ServiceLifecycle::new(
        ctx,
        Arc::new(store.clone()),
        Arc::new(platform.clone()),
        Arc::new(MemoryNetwork::new()),
        CatalogRegistry::with_defaults(),
        InitTaskTracker::new(),
        ReadinessWaiter::new(Duration::from_millis(10), Duration::from_secs(5)),
    );
    Harness {
        lifecycle,
        store,
        platform,
    }
}

fn common(name: &str) -> ServiceCommonRequest {
    ServiceCommonRequest {
        region: REGION.into(),
        cluster: CLUSTER.into(),
        service_name: name.into(),
    }
}

fn resource() -> Resources {
    Resources {
        max_cpu_units: -1,
        reserve_cpu_units: 256,
        max_mem_mb: -1,
        reserve_mem_mb: 512,
    }
}

fn redis_create(name: &str, shards: u64, replicas: u64, auth: &str) -> CreateRequest {
    CreateRequest {
        service: common(name),
        resource: resource(),
        options: json!({
            "shards": shards,
            "replicas_per_shard": replicas,
            "memory_cache_size_mb": 256,
            "volume_size_gb": 10,
            "auth_pass": auth,
        }),
    }
}

fn update(name: &str, options: Value) -> UpdateRequest {
    UpdateRequest {
        service: common(name),
        options,
    }
}

async fn redis_conf(store: &RecordingStore, uuid: &str, member: &str) -> (String, String, String) {
    let member = store.get_service_member(uuid, member).await.unwrap();
    let (_, cfg) = member.find_config(|n| n == "redis.conf").unwrap();
    let file = store.get_config_file(uuid, &cfg.file_id).await.unwrap();
    assert_eq!(file.file_md5, cfg.file_md5);
    (file.file_id, file.file_md5, file.content)
}

async fn wait_until_untracked(h: &Harness, uuid: &str) {
    for _ in 0..500 {
        if !h.lifecycle.tracker().contains(uuid).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("init task for {uuid} never finished");
}

#[tokio::test]
async fn cluster_create_registers_one_init_task() {
    let h = harness();
    h.platform.hold_convergence(true).await;

    h.lifecycle
        .create_service("redis", redis_create("redis1", 3, 1, "pw"))
        .await
        .unwrap();

    let attr = h.lifecycle.get_service_attr("redis1").await.unwrap();
    assert_eq!(attr.service_type, "redis");
    assert_eq!(attr.status, ServiceStatus::Initializing);
    assert_eq!(attr.replicas, 3);
    assert!(attr.require_static_ip);
    assert_eq!(attr.volumes.primary_device_name, "/dev/xvdf");

    let creates = h
        .platform
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c, PlatformCall::CreateService { .. }))
        .count();
    assert_eq!(creates, 1);

    let tasks = h.lifecycle.tracker().list_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].service_uuid, attr.service_uuid);

    let duplicate = InitTask {
        service_uuid: attr.service_uuid.clone(),
        service_name: "redis1".into(),
        service_type: "redis".into(),
        spec: InitTaskSpec {
            task_type: "init".into(),
            container_image: "tidepool/redis-init:4.0".into(),
            envs: Vec::new(),
        },
    };
    let err = h.lifecycle.tracker().add_init_task(&duplicate).await.unwrap_err();
    assert!(matches!(err, ManageError::InitInProgress(_)));

    // Static IPs were written into each member's config before start.
    let members = h.store.list_service_members(&attr.service_uuid).await.unwrap();
    assert_eq!(members.len(), 3);
    for member in &members {
        assert!(!member.static_ip.is_empty());
        let (_, _, content) = redis_conf(&h.store, &attr.service_uuid, &member.member_name).await;
        assert!(content.contains(&format!("cluster-announce-ip {}", member.static_ip)));
        assert!(content.contains("# requirepass pw"));
    }
}

#[tokio::test]
async fn set_init_enables_auth_and_restarts() {
    let h = harness();
    h.platform.hold_convergence(true).await;
    h.lifecycle
        .create_service("redis", redis_create("redis1", 3, 1, "pw"))
        .await
        .unwrap();

    let status = h.lifecycle.check_service_init("redis1").await.unwrap();
    assert!(!status.initialized);

    h.lifecycle
        .set_service_init(SetInitRequest {
            region: REGION.into(),
            cluster: CLUSTER.into(),
            service_name: "redis1".into(),
        })
        .await
        .unwrap();

    let status = h.lifecycle.check_service_init("redis1").await.unwrap();
    assert!(status.initialized);

    let attr = h.lifecycle.get_service_attr("redis1").await.unwrap();
    let (_, _, content) = redis_conf(&h.store, &attr.service_uuid, "redis1-shard1-0").await;
    assert!(content.contains("\nrequirepass pw\n"));
    assert!(content.contains("\nmasterauth pw\n"));
    assert!(!content.contains("# requirepass"));

    let calls = h.platform.calls().await;
    assert!(calls.contains(&PlatformCall::StopService {
        service_name: "redis1".into()
    }));
    assert!(calls.contains(&PlatformCall::ScaleService {
        service_name: "redis1".into(),
        replicas: 3
    }));

    // A repeated set-init is a no-op.
    h.store.clear_operations();
    h.lifecycle
        .set_service_init(SetInitRequest {
            region: REGION.into(),
            cluster: CLUSTER.into(),
            service_name: "redis1".into(),
        })
        .await
        .unwrap();
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn background_init_runs_task_and_activates() {
    let h = harness();
    h.lifecycle
        .create_service("redis", redis_create("redis1", 3, 2, ""))
        .await
        .unwrap();
    let attr = h.lifecycle.get_service_attr("redis1").await.unwrap();

    wait_until_untracked(&h, &attr.service_uuid).await;

    let status = h.lifecycle.check_service_init("redis1").await.unwrap();
    assert!(status.initialized);
    let calls = h.platform.calls().await;
    assert!(calls.contains(&PlatformCall::RunTask {
        service_name: "redis1".into(),
        task_type: "init".into()
    }));
    assert!(calls.contains(&PlatformCall::DeleteTask {
        service_name: "redis1".into(),
        task_type: "init".into()
    }));
}

#[tokio::test]
async fn failed_init_task_leaves_service_initializing() {
    let h = harness();
    h.platform
        .set_task_outcome(TaskState::Failed {
            reason: "cluster create failed".into(),
        })
        .await;
    h.lifecycle
        .create_service("redis", redis_create("redis1", 3, 1, ""))
        .await
        .unwrap();
    let attr = h.lifecycle.get_service_attr("redis1").await.unwrap();

    wait_until_untracked(&h, &attr.service_uuid).await;

    let attr = h.lifecycle.get_service_attr("redis1").await.unwrap();
    assert_eq!(attr.status, ServiceStatus::Initializing);
    assert!(!h.lifecycle.check_service_init("redis1").await.unwrap().initialized);
}

#[tokio::test]
async fn single_shard_is_active_and_duplicate_is_rejected() {
    let h = harness();
    h.lifecycle
        .create_service("redis", redis_create("cache", 1, 2, ""))
        .await
        .unwrap();

    let attr = h.lifecycle.get_service_attr("cache").await.unwrap();
    assert_eq!(attr.status, ServiceStatus::Active);
    assert!(h.lifecycle.tracker().list_tasks().await.is_empty());

    let (_, _, slave) = redis_conf(&h.store, &attr.service_uuid, "cache-shard0-1").await;
    assert!(slave.contains("slaveof cache-shard0-0.c1-tidepool.com 6379"));

    let err = h
        .lifecycle
        .create_service("redis", redis_create("cache", 1, 2, ""))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn interrupted_create_resumes_without_rewriting() {
    let h = harness();
    h.platform.hold_convergence(true).await;
    h.platform.set_unavailable("create_service", true).await;

    let err = h
        .lifecycle
        .create_service("redis", redis_create("redis1", 3, 1, "pw"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 503);

    let attr = h.lifecycle.get_service_attr("redis1").await.unwrap();
    assert_eq!(attr.status, ServiceStatus::Creating);
    let first_ips = h.store.list_service_static_ips(&attr.service_uuid).await.unwrap();
    assert_eq!(first_ips.len(), 3);

    h.platform.set_unavailable("create_service", false).await;
    h.store.clear_operations();
    h.lifecycle
        .create_service("redis", redis_create("redis1", 3, 1, "pw"))
        .await
        .unwrap();

    // Only the status moves; members, files and static IPs are reused.
    let ops = h.store.operations();
    assert!(
        ops.iter().all(|op| matches!(op, StoreOp::Update { table: "service_attrs", .. })),
        "unexpected writes: {ops:?}"
    );
    let attr = h.lifecycle.get_service_attr("redis1").await.unwrap();
    assert_eq!(attr.status, ServiceStatus::Initializing);
    assert_eq!(
        h.store.list_service_static_ips(&attr.service_uuid).await.unwrap(),
        first_ips
    );
}

#[tokio::test]
async fn auth_toggle_rewrites_every_member() {
    let h = harness();
    h.lifecycle
        .create_service("redis", redis_create("cache", 1, 3, ""))
        .await
        .unwrap();
    let attr = h.lifecycle.get_service_attr("cache").await.unwrap();
    let members = ["cache-shard0-0", "cache-shard0-1", "cache-shard0-2"];

    let mut before = Vec::new();
    for m in members {
        before.push(redis_conf(&h.store, &attr.service_uuid, m).await);
    }

    h.lifecycle
        .update_service("redis", update("cache", json!({"auth_pass": "secret"})))
        .await
        .unwrap();

    for (m, (old_id, old_md5, _)) in members.iter().zip(&before) {
        let (id, md5, content) = redis_conf(&h.store, &attr.service_uuid, m).await;
        assert_ne!(&id, old_id);
        assert_ne!(&md5, old_md5);
        assert_eq!(md5, content_md5(&content));
        assert!(content.contains("requirepass secret"));
        assert!(content.contains("masterauth secret"));
    }

    let updated = h.lifecycle.get_service_attr("cache").await.unwrap();
    let ua: Value = serde_json::from_slice(&updated.user_attr).unwrap();
    assert_eq!(ua["auth_pass"], "secret");
    assert_eq!(ua["memory_cache_size_mb"], 256);

    // Same value again: nothing to do.
    h.store.clear_operations();
    h.lifecycle
        .update_service("redis", update("cache", json!({"auth_pass": "secret"})))
        .await
        .unwrap();
    assert_eq!(h.store.write_count(), 0);

    h.lifecycle
        .update_service("redis", update("cache", json!({"auth_pass": ""})))
        .await
        .unwrap();
    let (_, _, content) = redis_conf(&h.store, &attr.service_uuid, "cache-shard0-0").await;
    assert!(!content.contains("requirepass"));
    assert!(!content.contains("masterauth"));
}

#[tokio::test]
async fn telegraf_reads_monitored_service() {
    let h = harness();
    h.lifecycle
        .create_service("redis", redis_create("cache", 1, 1, "pw"))
        .await
        .unwrap();
    h.lifecycle
        .create_service(
            "telegraf",
            CreateRequest {
                service: common("cache-monitor"),
                resource: Resources::default(),
                options: json!({"monitor_service_name": "cache", "collect_interval_secs": 30}),
            },
        )
        .await
        .unwrap();

    let opts = h.platform.service_options(CLUSTER, "cache-monitor").await.unwrap();
    assert_eq!(opts.replicas, 1);
    assert!(!opts.register_dns);
    let env = |name: &str| {
        opts.envs
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.clone())
    };
    assert_eq!(env("MONITOR_SERVICE_NAME").as_deref(), Some("cache"));
    assert_eq!(env("MONITOR_SERVICE_TYPE").as_deref(), Some("redis"));
    assert_eq!(env("COLLECT_INTERVAL").as_deref(), Some("30s"));
    assert_eq!(env("REDIS_AUTH").as_deref(), Some("pw"));

    let err = h
        .lifecycle
        .create_service(
            "telegraf",
            CreateRequest {
                service: common("orphan-monitor"),
                resource: Resources::default(),
                options: json!({"monitor_service_name": "missing"}),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn request_errors_are_classified() {
    let h = harness();

    let err = h
        .lifecycle
        .create_service("mongodb", redis_create("db", 1, 1, ""))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);

    let mut foreign = redis_create("db", 1, 1, "");
    foreign.service.cluster = "other".into();
    let err = h.lifecycle.create_service("redis", foreign).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = h
        .lifecycle
        .create_service("redis", redis_create("db", 2, 1, ""))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = h
        .lifecycle
        .update_service("redis", update("missing", json!({"auth_pass": "x"})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);

    let err = h.lifecycle.check_service_init("missing").await.unwrap_err();
    assert!(matches!(err, ManageError::ServiceNotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_schedule_one_init_task() {
    let h = harness();
    h.platform.hold_convergence(true).await;

    for i in 0..50 {
        let name = format!("r{i}");
        let first = h.lifecycle.clone();
        let second = h.lifecycle.clone();
        let (a, b) = tokio::join!(
            tokio::spawn({
                let name = name.clone();
                async move { first.create_service("redis", redis_create(&name, 3, 1, "pw")).await }
            }),
            tokio::spawn({
                let name = name.clone();
                async move { second.create_service("redis", redis_create(&name, 3, 1, "pw")).await }
            }),
        );
        let results = [a.unwrap(), b.unwrap()];
        assert!(results.iter().any(|r| r.is_ok()), "{name}: {results:?}");
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(err.status_code(), 409, "{name}: {err}");
        }

        let record = h.store.get_service(CLUSTER, &name).await.unwrap();
        let tasks: Vec<_> = h
            .lifecycle
            .tracker()
            .list_tasks()
            .await
            .into_iter()
            .filter(|t| t.service_name == name)
            .collect();
        assert_eq!(tasks.len(), 1, "{name}: {tasks:?}");
        assert_eq!(tasks[0].service_uuid, record.service_uuid);
    }
}

#[tokio::test]
async fn update_retry_finishes_after_partial_failure() {
    let h = harness();
    h.lifecycle
        .create_service("redis", redis_create("cache", 1, 3, ""))
        .await
        .unwrap();
    let uuid = h.lifecycle.get_service_attr("cache").await.unwrap().service_uuid;

    // An earlier pass wrote the last member's next version and then stopped.
    let last = h.store.get_service_member(&uuid, "cache-shard0-2").await.unwrap();
    let (_, cfg) = last.find_config(|n| n == "redis.conf").unwrap();
    let file = h.store.get_config_file(&uuid, &cfg.file_id).await.unwrap();
    let abandoned = file.next_version(format!("{}requirepass abandoned\n", file.content));
    h.store.create_config_file(&abandoned).await.unwrap();

    h.store.inject_failure(format!("{uuid}:cache-shard0-1-redis.conf-1"));
    let err = h
        .lifecycle
        .update_service("redis", update("cache", json!({"memory_cache_size_mb": 512})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 503);
    assert!(err.to_string().contains("cache-shard0-1"));

    h.store.clear_failures();
    h.store.clear_operations();
    h.lifecycle
        .update_service("redis", update("cache", json!({"memory_cache_size_mb": 512})))
        .await
        .unwrap();

    let first_key = format!("{uuid}:cache-shard0-0");
    let ops = h.store.operations();
    assert!(
        ops.iter().all(|op| !op.key().starts_with(&first_key)),
        "first member was rewritten: {ops:?}"
    );

    for m in ["cache-shard0-0", "cache-shard0-1", "cache-shard0-2"] {
        let (_, _, content) = redis_conf(&h.store, &uuid, m).await;
        assert!(content.contains("\nmaxmemory 512mb\n"), "{m}: {content}");
        assert!(!content.contains("abandoned"));
    }
    let ua: Value =
        serde_json::from_slice(&h.lifecycle.get_service_attr("cache").await.unwrap().user_attr)
            .unwrap();
    assert_eq!(ua["memory_cache_size_mb"], 512);
}
