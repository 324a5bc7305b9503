//! Requests and status snapshots exchanged with the container platform.

use serde::{Deserialize, Serialize};
use tidepool_core::{EnvKeyValuePair, PortMapping, Resources};

/// Everything the platform needs to run a service's replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateServiceOptions {
    pub cluster: String,
    pub service_name: String,
    pub service_uuid: String,
    pub container_image: String,
    pub resource: Resources,
    pub replicas: u64,
    pub port_mappings: Vec<PortMapping>,
    pub envs: Vec<EnvKeyValuePair>,
    pub register_dns: bool,
    pub domain_name: String,
    pub require_static_ip: bool,
    pub primary_device_name: String,
    pub journal_device_name: Option<String>,
}

/// Replica counts reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRunStatus {
    pub running_count: u64,
    pub desired_count: u64,
}

impl ServiceRunStatus {
    /// Every desired replica is running, and at least one is desired.
    pub fn is_converged(&self) -> bool {
        self.desired_count != 0 && self.running_count == self.desired_count
    }
}

/// A one-shot container run alongside a service, such as an init task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskOptions {
    pub cluster: String,
    pub service_name: String,
    pub service_uuid: String,
    pub task_type: String,
    pub container_image: String,
    pub resource: Resources,
    pub envs: Vec<EnvKeyValuePair>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed { reason: String },
}

impl TaskState {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed { .. })
    }
}

/// A static IP handed out by the network allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedIp {
    pub ip: String,
    pub network_interface_id: String,
}
