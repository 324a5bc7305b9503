//! The second phase of service creation.
//!
//! Services whose module asks for an init task are left INITIALIZING by the
//! create path. `InitPhase` runs that task in the background, then applies
//! the module's init mutations, restarts the containers so they pick up the
//! new config, and marks the service ACTIVE. The same completion step backs
//! the set-init request, so either caller may finish first.

use std::sync::Arc;

use tidepool_catalog::CatalogRegistry;
use tidepool_core::Resources;
use tidepool_platform::{ContainerPlatform, RunTaskOptions, TaskState};
use tidepool_state::{MetadataStore, ServiceAttr, ServiceStatus, StateError};
use tracing::{error, info, warn};

use crate::config_update::ConfigUpdateEngine;
use crate::error::{ManageError, ManageResult};
use crate::init_task::{InitTask, InitTaskTracker, TaskOutcome};
use crate::waiter::{Readiness, ReadinessWaiter};

pub const RESTART_STATUS_MSG: &str = "restarting all containers";

/// Resources of an init task container.
const INIT_TASK_RESOURCE: Resources = Resources {
    max_cpu_units: -1,
    reserve_cpu_units: 0,
    max_mem_mb: -1,
    reserve_mem_mb: 256,
};

#[derive(Clone)]
pub struct InitPhase {
    store: Arc<dyn MetadataStore>,
    platform: Arc<dyn ContainerPlatform>,
    catalog: CatalogRegistry,
    tracker: InitTaskTracker,
    engine: ConfigUpdateEngine,
    cluster: String,
    waiter: ReadinessWaiter,
}

impl InitPhase {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        platform: Arc<dyn ContainerPlatform>,
        catalog: CatalogRegistry,
        tracker: InitTaskTracker,
        cluster: impl Into<String>,
        waiter: ReadinessWaiter,
    ) -> Self {
        Self {
            engine: ConfigUpdateEngine::new(store.clone()),
            store,
            platform,
            catalog,
            tracker,
            cluster: cluster.into(),
            waiter,
        }
    }

    /// Finish initialization of `service_name`. A no-op once it is ACTIVE.
    pub async fn complete_init(&self, service_name: &str) -> ManageResult<()> {
        let record = self
            .store
            .get_service(&self.cluster, service_name)
            .await
            .map_err(|e| not_found_as(e, service_name))?;
        let attr = self.store.get_service_attr(&record.service_uuid).await?;
        match attr.status {
            ServiceStatus::Active => {
                info!(service = %service_name, "service already initialized");
                return Ok(());
            }
            ServiceStatus::Initializing => {}
            other => {
                return Err(ManageError::InvalidRequest(format!(
                    "service {service_name} is {other}, not initializing"
                )));
            }
        }

        let module = self.catalog.get(&attr.service_type)?;
        for mutation in module.init_mutations(&attr.user_attr)? {
            self.tracker
                .update_task_status_msg(&attr.service_uuid, mutation.name())
                .await;
            self.engine
                .apply(&attr.service_uuid, module.as_ref(), mutation.as_ref())
                .await?;
        }

        self.tracker
            .update_task_status_msg(&attr.service_uuid, RESTART_STATUS_MSG)
            .await;
        self.platform.stop_service(&self.cluster, service_name).await?;
        self.platform
            .scale_service(&self.cluster, service_name, attr.replicas)
            .await?;

        self.mark_active(&attr.service_uuid).await?;
        info!(service = %service_name, service_uuid = %attr.service_uuid, "service initialized");
        Ok(())
    }

    async fn mark_active(&self, service_uuid: &str) -> ManageResult<()> {
        let current = self.store.get_service_attr(service_uuid).await?;
        if current.status == ServiceStatus::Active {
            return Ok(());
        }
        let active = current.with_status(ServiceStatus::Active);
        match self.store.update_service_attr(&current, &active).await {
            Ok(()) => Ok(()),
            Err(StateError::Conflict(_)) => {
                // A concurrent completion may have won the race.
                let latest: ServiceAttr = self.store.get_service_attr(service_uuid).await?;
                if latest.status == ServiceStatus::Active {
                    Ok(())
                } else {
                    Err(StateError::Conflict(format!("service attr {service_uuid}")).into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drive a tracked init task to a terminal outcome. Runs detached from the
    /// request that created the service.
    pub async fn run_task(&self, task: InitTask) {
        self.tracker.mark_running(&task.service_uuid).await;
        let outcome = match self.drive(&task).await {
            Ok(()) => TaskOutcome::Completed,
            Err(e) => {
                error!(
                    service = %task.service_name,
                    service_uuid = %task.service_uuid,
                    error = %e,
                    "service initialization failed"
                );
                TaskOutcome::Failed(e.to_string())
            }
        };
        self.tracker.remove(&task.service_uuid, outcome).await;
    }

    async fn drive(&self, task: &InitTask) -> ManageResult<()> {
        let cluster = self.cluster.as_str();
        let name = task.service_name.as_str();

        self.tracker
            .update_task_status_msg(&task.service_uuid, "wait for all service containers running")
            .await;
        let what = format!("service {name}");
        self.waiter
            .wait(
                &what,
                || self.platform.get_service_status(cluster, name),
                |status| {
                    if status.is_converged() {
                        Readiness::Ready
                    } else {
                        Readiness::NotReady
                    }
                },
            )
            .await?;

        self.tracker
            .update_task_status_msg(&task.service_uuid, "run init task")
            .await;
        let opts = RunTaskOptions {
            cluster: cluster.to_string(),
            service_name: name.to_string(),
            service_uuid: task.service_uuid.clone(),
            task_type: task.spec.task_type.clone(),
            container_image: task.spec.container_image.clone(),
            resource: INIT_TASK_RESOURCE,
            envs: task.spec.envs.clone(),
        };
        let task_id = self.platform.run_task(&opts).await?;

        let what = format!("{} task {task_id} of {name}", task.spec.task_type);
        let waited = self
            .waiter
            .wait(
                &what,
                || self.platform.get_task_status(cluster, &task_id),
                |state| match state {
                    TaskState::Succeeded => Readiness::Ready,
                    TaskState::Failed { reason } => Readiness::Abort(reason.clone()),
                    TaskState::Pending | TaskState::Running => Readiness::NotReady,
                },
            )
            .await;

        if let Err(e) = self
            .platform
            .delete_task(cluster, name, &task.spec.task_type)
            .await
        {
            warn!(service = %name, %task_id, error = %e, "failed to delete init task");
        }
        waited?;

        self.complete_init(name).await
    }
}

fn not_found_as(err: StateError, service_name: &str) -> ManageError {
    if err.is_not_found() {
        ManageError::ServiceNotFound(service_name.to_string())
    } else {
        err.into()
    }
}
