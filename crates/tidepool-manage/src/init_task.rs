//! In-flight service initialization tasks.
//!
//! At most one init task exists per service. The tracker is the only place
//! that state lives: a task enters on `add_init_task` and leaves when it
//! reaches a terminal outcome.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tidepool_catalog::InitTaskSpec;
use tidepool_core::epoch_millis;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ManageError, ManageResult};

/// Work item handed to the init phase runner.
#[derive(Debug, Clone)]
pub struct InitTask {
    pub service_uuid: String,
    pub service_name: String,
    pub service_type: String,
    pub spec: InitTaskSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
    Pending,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
}

/// Snapshot of a tracked task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitTaskStatus {
    pub service_uuid: String,
    pub service_name: String,
    pub service_type: String,
    pub phase: TaskPhase,
    pub status_message: String,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Clone, Default)]
pub struct InitTaskTracker {
    /// Tracked tasks: service_uuid → status.
    tasks: Arc<RwLock<HashMap<String, InitTaskStatus>>>,
}

impl InitTaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task for the service. Fails if one is already tracked.
    pub async fn add_init_task(&self, task: &InitTask) -> ManageResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.service_uuid) {
            return Err(ManageError::InitInProgress(task.service_name.clone()));
        }
        let now = epoch_millis();
        tasks.insert(
            task.service_uuid.clone(),
            InitTaskStatus {
                service_uuid: task.service_uuid.clone(),
                service_name: task.service_name.clone(),
                service_type: task.service_type.clone(),
                phase: TaskPhase::Pending,
                status_message: String::new(),
                created_at: now,
                updated_at: now,
            },
        );
        info!(service = %task.service_name, service_uuid = %task.service_uuid, "init task added");
        Ok(())
    }

    pub async fn mark_running(&self, service_uuid: &str) {
        let mut tasks = self.tasks.write().await;
        if let Some(status) = tasks.get_mut(service_uuid) {
            status.phase = TaskPhase::Running;
            status.updated_at = epoch_millis();
        }
    }

    /// Overwrite the task's status message. Unknown services are ignored.
    pub async fn update_task_status_msg(&self, service_uuid: &str, msg: &str) {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(service_uuid) {
            Some(status) => {
                status.status_message = msg.to_string();
                status.updated_at = epoch_millis();
                debug!(%service_uuid, status_message = msg, "init task status updated");
            }
            None => debug!(%service_uuid, "no init task to update"),
        }
    }

    pub async fn get_task_status(&self, service_uuid: &str) -> Option<InitTaskStatus> {
        self.tasks.read().await.get(service_uuid).cloned()
    }

    pub async fn list_tasks(&self) -> Vec<InitTaskStatus> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<_> = tasks.values().cloned().collect();
        list.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        list
    }

    pub async fn contains(&self, service_uuid: &str) -> bool {
        self.tasks.read().await.contains_key(service_uuid)
    }

    /// Drop a task that reached a terminal outcome.
    pub async fn remove(&self, service_uuid: &str, outcome: TaskOutcome) {
        let removed = self.tasks.write().await.remove(service_uuid);
        let Some(status) = removed else {
            return;
        };
        match outcome {
            TaskOutcome::Completed => {
                info!(service = %status.service_name, %service_uuid, "init task completed")
            }
            TaskOutcome::Failed(reason) => {
                warn!(service = %status.service_name, %service_uuid, %reason, "init task failed")
            }
        }
    }
}
