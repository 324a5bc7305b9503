//! Contracts for the container orchestrator and the network allocator.

use async_trait::async_trait;

use crate::error::PlatformResult;
use crate::types::*;

#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    /// Create the service. Fails with `ServiceExists` if it is already there.
    async fn create_service(&self, opts: &CreateServiceOptions) -> PlatformResult<()>;
    async fn is_service_exist(&self, cluster: &str, service_name: &str) -> PlatformResult<bool>;
    async fn get_service_status(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> PlatformResult<ServiceRunStatus>;
    /// Stop every running container of the service.
    async fn stop_service(&self, cluster: &str, service_name: &str) -> PlatformResult<()>;
    async fn scale_service(
        &self,
        cluster: &str,
        service_name: &str,
        replicas: u64,
    ) -> PlatformResult<()>;

    /// Start a one-shot task and return its id.
    async fn run_task(&self, opts: &RunTaskOptions) -> PlatformResult<String>;
    async fn get_task_status(&self, cluster: &str, task_id: &str) -> PlatformResult<TaskState>;
    async fn delete_task(
        &self,
        cluster: &str,
        service_name: &str,
        task_type: &str,
    ) -> PlatformResult<()>;
}

#[async_trait]
pub trait NetworkAllocator: Send + Sync {
    async fn allocate_static_ip(&self, cluster: &str, zone: &str) -> PlatformResult<AllocatedIp>;
}
