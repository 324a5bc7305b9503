//! Start-up: open the metadata store, prepare it for the configured db type
//! and assemble the service lifecycle.
//!
//! Every wait here is bounded by the configured [`ReadinessWaiter`]. A
//! timeout is returned to `main` and ends the process.

use std::sync::Arc;

use anyhow::Context;
use tidepool_catalog::CatalogRegistry;
use tidepool_core::{
    CONTROL_DB_CONTAINER_IMAGE, CONTROL_DB_SERVER_PORT, CONTROL_DB_SERVICE_NAME, DbType,
    ENV_CONTAINER_PLATFORM, EnvKeyValuePair, ManageConfig, PortMapping, Resources,
    default_domain_name,
};
use tidepool_manage::{
    InitTaskTracker, ManageContext, Readiness, ReadinessWaiter, ServiceLifecycle,
};
use tidepool_platform::{
    ContainerPlatform, CreateServiceOptions, MemoryNetwork, MemoryPlatform, PlatformError,
};
use tidepool_state::{MetadataStore, StateStore, TableStatus};
use tracing::{debug, info};
use uuid::Uuid;

const DB_FILE_NAME: &str = "tidepool.redb";

/// Data device of the control DB. Outside the range handed to services.
const CONTROL_DB_DEVICE_NAME: &str = "/dev/xvde";

const CONTROL_DB_RESOURCE: Resources = Resources {
    max_cpu_units: -1,
    reserve_cpu_units: 256,
    max_mem_mb: 4096,
    reserve_mem_mb: 256,
};

/// Open and prepare everything the API needs.
pub async fn bootstrap(config: &ManageConfig) -> anyhow::Result<ServiceLifecycle> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
    let db_path = config.data_dir.join(DB_FILE_NAME);
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Platform SDK bindings are not linked into this binary.
    let platform = Arc::new(MemoryPlatform::new());
    info!(platform = %config.platform, "using the in-process container platform");

    let waiter = ReadinessWaiter::from_config(&config.wait);
    prepare_store(config, &store, platform.as_ref(), &waiter).await?;

    let ctx = ManageContext {
        region: config.region.clone(),
        cluster: config.cluster.clone(),
        platform: config.platform,
        zones: config.availability_zones.clone(),
        domain_name: default_domain_name(&config.cluster),
        manage_url: config.manage_url(),
        hosted_zone_id: String::new(),
    };
    Ok(ServiceLifecycle::new(
        ctx,
        Arc::new(store),
        platform,
        Arc::new(MemoryNetwork::new()),
        CatalogRegistry::with_defaults(),
        InitTaskTracker::new(),
        waiter,
    ))
}

/// Bring the metadata backend to a usable state.
pub async fn prepare_store(
    config: &ManageConfig,
    store: &dyn MetadataStore,
    platform: &dyn ContainerPlatform,
    waiter: &ReadinessWaiter,
) -> anyhow::Result<()> {
    match config.db_type {
        DbType::CloudDb => ensure_system_tables(store, waiter).await,
        DbType::ControlDb => {
            ensure_control_db(config, platform).await?;
            wait_control_db(&config.cluster, platform, waiter).await
        }
        DbType::K8sDb => {
            debug!("config-map store needs no preparation");
            Ok(())
        }
    }
}

async fn ensure_system_tables(
    store: &dyn MetadataStore,
    waiter: &ReadinessWaiter,
) -> anyhow::Result<()> {
    let (status, ready) = store
        .system_tables_ready()
        .await
        .context("failed to check the system tables")?;
    if ready {
        info!("system tables are ready");
        return Ok(());
    }

    info!(%status, "creating system tables");
    store
        .create_system_tables()
        .await
        .context("failed to create the system tables")?;

    waiter
        .wait(
            "system tables",
            || store.system_tables_ready(),
            |(status, ready)| {
                if *ready {
                    Readiness::Ready
                } else if *status == TableStatus::Creating {
                    Readiness::NotReady
                } else {
                    Readiness::Abort(format!("unexpected table status {status}"))
                }
            },
        )
        .await?;
    info!("system tables are ready");
    Ok(())
}

async fn ensure_control_db(
    config: &ManageConfig,
    platform: &dyn ContainerPlatform,
) -> anyhow::Result<()> {
    let cluster = &config.cluster;
    if platform
        .is_service_exist(cluster, CONTROL_DB_SERVICE_NAME)
        .await
        .context("failed to check the control db service")?
    {
        info!("the control db service is already created");
        return Ok(());
    }

    let service_uuid = format!("{CONTROL_DB_SERVICE_NAME}-{}", Uuid::new_v4().simple());
    let opts = CreateServiceOptions {
        cluster: cluster.clone(),
        service_name: CONTROL_DB_SERVICE_NAME.to_string(),
        service_uuid: service_uuid.clone(),
        container_image: CONTROL_DB_CONTAINER_IMAGE.to_string(),
        resource: CONTROL_DB_RESOURCE,
        replicas: 1,
        port_mappings: vec![PortMapping {
            container_port: CONTROL_DB_SERVER_PORT,
            host_port: CONTROL_DB_SERVER_PORT,
        }],
        envs: vec![EnvKeyValuePair::new(
            ENV_CONTAINER_PLATFORM,
            config.platform.as_str(),
        )],
        register_dns: false,
        domain_name: default_domain_name(cluster),
        require_static_ip: false,
        primary_device_name: CONTROL_DB_DEVICE_NAME.to_string(),
        journal_device_name: None,
    };

    match platform.create_service(&opts).await {
        Ok(()) => info!(%service_uuid, "created the control db service"),
        Err(PlatformError::ServiceExists(_)) => {
            info!("the control db service was created concurrently")
        }
        Err(e) => return Err(e).context("failed to create the control db service"),
    }
    Ok(())
}

async fn wait_control_db(
    cluster: &str,
    platform: &dyn ContainerPlatform,
    waiter: &ReadinessWaiter,
) -> anyhow::Result<()> {
    waiter
        .wait(
            "control db service",
            || platform.get_service_status(cluster, CONTROL_DB_SERVICE_NAME),
            |status| {
                if status.is_converged() {
                    Readiness::Ready
                } else {
                    Readiness::NotReady
                }
            },
        )
        .await?;
    info!("the control db service is ready");
    Ok(())
}
