//! The metadata store contract.
//!
//! Gets of a missing key fail with [`StateError::NotFound`]. Creates fail
//! with [`StateError::RecordExists`] when the key is taken. Updates take the
//! caller's view of the old record and fail with [`StateError::Conflict`] if
//! the stored value has moved on.
//!
//! [`StateError::NotFound`]: crate::StateError::NotFound
//! [`StateError::RecordExists`]: crate::StateError::RecordExists
//! [`StateError::Conflict`]: crate::StateError::Conflict

use async_trait::async_trait;

use crate::error::StateResult;
use crate::types::*;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_system_tables(&self) -> StateResult<()>;
    /// Current table status, and whether the store is ready for use.
    async fn system_tables_ready(&self) -> StateResult<(TableStatus, bool)>;

    async fn create_device(&self, dev: &Device) -> StateResult<()>;
    async fn get_device(&self, cluster: &str, device_name: &str) -> StateResult<Device>;
    async fn list_devices(&self, cluster: &str) -> StateResult<Vec<Device>>;
    async fn delete_device(&self, cluster: &str, device_name: &str) -> StateResult<()>;

    async fn create_service(&self, svc: &ServiceRecord) -> StateResult<()>;
    async fn get_service(&self, cluster: &str, service_name: &str) -> StateResult<ServiceRecord>;
    async fn list_services(&self, cluster: &str) -> StateResult<Vec<ServiceRecord>>;
    async fn delete_service(&self, cluster: &str, service_name: &str) -> StateResult<()>;

    async fn create_service_attr(&self, attr: &ServiceAttr) -> StateResult<()>;
    async fn get_service_attr(&self, service_uuid: &str) -> StateResult<ServiceAttr>;
    async fn update_service_attr(&self, old: &ServiceAttr, new: &ServiceAttr) -> StateResult<()>;
    async fn delete_service_attr(&self, service_uuid: &str) -> StateResult<()>;

    async fn create_service_member(&self, member: &ServiceMember) -> StateResult<()>;
    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> StateResult<ServiceMember>;
    /// Members of a service ordered by member index.
    async fn list_service_members(&self, service_uuid: &str) -> StateResult<Vec<ServiceMember>>;
    async fn update_service_member(
        &self,
        old: &ServiceMember,
        new: &ServiceMember,
    ) -> StateResult<()>;
    async fn delete_service_member(&self, service_uuid: &str, member_name: &str)
    -> StateResult<()>;

    async fn create_config_file(&self, cfg: &ConfigFile) -> StateResult<()>;
    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> StateResult<ConfigFile>;
    async fn list_config_files(&self, service_uuid: &str) -> StateResult<Vec<ConfigFile>>;
    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> StateResult<()>;

    async fn create_service_static_ip(&self, ip: &ServiceStaticIP) -> StateResult<()>;
    async fn get_service_static_ip(&self, static_ip: &str) -> StateResult<ServiceStaticIP>;
    async fn list_service_static_ips(&self, service_uuid: &str)
    -> StateResult<Vec<ServiceStaticIP>>;
    async fn update_service_static_ip(
        &self,
        old: &ServiceStaticIP,
        new: &ServiceStaticIP,
    ) -> StateResult<()>;
    async fn delete_service_static_ip(&self, static_ip: &str) -> StateResult<()>;
}
