//! A [`MetadataStore`] wrapper that records every write.
//!
//! Reads pass straight through. Writes are logged with their table and key,
//! so tests can assert that a retried pass wrote nothing, and can be made to
//! fail by key prefix to exercise partial failures.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::db::MetadataStore;
use crate::error::{StateError, StateResult};
use crate::store::StateStore;
use crate::types::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Create { table: &'static str, key: String },
    Update { table: &'static str, key: String },
    Delete { table: &'static str, key: String },
}

impl StoreOp {
    pub fn table(&self) -> &'static str {
        match self {
            StoreOp::Create { table, .. } | StoreOp::Update { table, .. } | StoreOp::Delete { table, .. } => table,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StoreOp::Create { key, .. } | StoreOp::Update { key, .. } | StoreOp::Delete { key, .. } => key,
        }
    }
}

#[derive(Clone)]
pub struct RecordingStore {
    inner: StateStore,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_keys: Arc<Mutex<Vec<String>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingStore {
    pub fn new(inner: StateStore) -> Self {
        Self {
            inner,
            operations: Arc::default(),
            fail_keys: Arc::default(),
        }
    }

    pub fn in_memory() -> StateResult<Self> {
        Ok(Self::new(StateStore::open_in_memory()?))
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        lock(&self.operations).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.operations).len()
    }

    pub fn clear_operations(&self) {
        lock(&self.operations).clear();
    }

    /// Make writes to any key starting with `prefix` fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        lock(&self.fail_keys).push(prefix.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_keys).clear();
    }

    fn check(&self, op: &StoreOp) -> StateResult<()> {
        let key = op.key();
        if lock(&self.fail_keys).iter().any(|p| key.starts_with(p.as_str())) {
            return Err(StateError::Write(format!("injected failure for {key}")));
        }
        Ok(())
    }

    /// Run a write, recording it only if it succeeds.
    async fn track(&self, op: StoreOp, write: impl Future<Output = StateResult<()>>) -> StateResult<()> {
        self.check(&op)?;
        write.await?;
        lock(&self.operations).push(op);
        Ok(())
    }
}

fn create(table: &'static str, key: String) -> StoreOp {
    StoreOp::Create { table, key }
}

fn update(table: &'static str, key: String) -> StoreOp {
    StoreOp::Update { table, key }
}

fn delete(table: &'static str, key: String) -> StoreOp {
    StoreOp::Delete { table, key }
}

#[async_trait]
impl MetadataStore for RecordingStore {
    async fn create_system_tables(&self) -> StateResult<()> {
        self.track(create("system", "system_tables".into()), self.inner.create_system_tables())
            .await
    }

    async fn system_tables_ready(&self) -> StateResult<(TableStatus, bool)> {
        self.inner.system_tables_ready().await
    }

    async fn create_device(&self, dev: &Device) -> StateResult<()> {
        self.track(create("devices", dev.table_key()), self.inner.create_device(dev))
            .await
    }

    async fn get_device(&self, cluster: &str, device_name: &str) -> StateResult<Device> {
        self.inner.get_device(cluster, device_name).await
    }

    async fn list_devices(&self, cluster: &str) -> StateResult<Vec<Device>> {
        self.inner.list_devices(cluster).await
    }

    async fn delete_device(&self, cluster: &str, device_name: &str) -> StateResult<()> {
        self.track(delete("devices", device_key(cluster, device_name)), self.inner.delete_device(cluster, device_name))
            .await
    }

    async fn create_service(&self, svc: &ServiceRecord) -> StateResult<()> {
        self.track(create("services", svc.table_key()), self.inner.create_service(svc))
            .await
    }

    async fn get_service(&self, cluster: &str, service_name: &str) -> StateResult<ServiceRecord> {
        self.inner.get_service(cluster, service_name).await
    }

    async fn list_services(&self, cluster: &str) -> StateResult<Vec<ServiceRecord>> {
        self.inner.list_services(cluster).await
    }

    async fn delete_service(&self, cluster: &str, service_name: &str) -> StateResult<()> {
        self.track(delete("services", service_key(cluster, service_name)), self.inner.delete_service(cluster, service_name))
            .await
    }

    async fn create_service_attr(&self, attr: &ServiceAttr) -> StateResult<()> {
        self.track(create("service_attrs", attr.service_uuid.clone()), self.inner.create_service_attr(attr))
            .await
    }

    async fn get_service_attr(&self, service_uuid: &str) -> StateResult<ServiceAttr> {
        self.inner.get_service_attr(service_uuid).await
    }

    async fn update_service_attr(&self, old: &ServiceAttr, new: &ServiceAttr) -> StateResult<()> {
        self.track(update("service_attrs", new.service_uuid.clone()), self.inner.update_service_attr(old, new))
            .await
    }

    async fn delete_service_attr(&self, service_uuid: &str) -> StateResult<()> {
        self.track(delete("service_attrs", service_uuid.to_string()), self.inner.delete_service_attr(service_uuid))
            .await
    }

    async fn create_service_member(&self, member: &ServiceMember) -> StateResult<()> {
        self.track(create("members", member.table_key()), self.inner.create_service_member(member))
            .await
    }

    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> StateResult<ServiceMember> {
        self.inner.get_service_member(service_uuid, member_name).await
    }

    async fn list_service_members(&self, service_uuid: &str) -> StateResult<Vec<ServiceMember>> {
        self.inner.list_service_members(service_uuid).await
    }

    async fn update_service_member(
        &self,
        old: &ServiceMember,
        new: &ServiceMember,
    ) -> StateResult<()> {
        self.track(update("members", new.table_key()), self.inner.update_service_member(old, new))
            .await
    }

    async fn delete_service_member(&self, service_uuid: &str, member_name: &str) -> StateResult<()> {
        self.track(delete("members", member_key(service_uuid, member_name)), self.inner.delete_service_member(service_uuid, member_name))
            .await
    }

    async fn create_config_file(&self, cfg: &ConfigFile) -> StateResult<()> {
        self.track(create("config_files", cfg.table_key()), self.inner.create_config_file(cfg))
            .await
    }

    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> StateResult<ConfigFile> {
        self.inner.get_config_file(service_uuid, file_id).await
    }

    async fn list_config_files(&self, service_uuid: &str) -> StateResult<Vec<ConfigFile>> {
        self.inner.list_config_files(service_uuid).await
    }

    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> StateResult<()> {
        self.track(delete("config_files", config_file_key(service_uuid, file_id)), self.inner.delete_config_file(service_uuid, file_id))
            .await
    }

    async fn create_service_static_ip(&self, ip: &ServiceStaticIP) -> StateResult<()> {
        self.track(create("static_ips", ip.static_ip.clone()), self.inner.create_service_static_ip(ip))
            .await
    }

    async fn get_service_static_ip(&self, static_ip: &str) -> StateResult<ServiceStaticIP> {
        self.inner.get_service_static_ip(static_ip).await
    }

    async fn list_service_static_ips(&self, service_uuid: &str) -> StateResult<Vec<ServiceStaticIP>> {
        self.inner.list_service_static_ips(service_uuid).await
    }

    async fn update_service_static_ip(
        &self,
        old: &ServiceStaticIP,
        new: &ServiceStaticIP,
    ) -> StateResult<()> {
        self.track(update("static_ips", new.static_ip.clone()), self.inner.update_service_static_ip(old, new))
            .await
    }

    async fn delete_service_static_ip(&self, static_ip: &str) -> StateResult<()> {
        self.track(delete("static_ips", static_ip.to_string()), self.inner.delete_service_static_ip(static_ip))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> ServiceRecord {
        ServiceRecord {
            cluster_name: "c1".into(),
            service_name: name.into(),
            service_uuid: format!("uuid-{name}"),
        }
    }

    #[tokio::test]
    async fn records_writes_not_reads() {
        let store = RecordingStore::in_memory().unwrap();
        store.create_service(&record("redis1")).await.unwrap();
        store.get_service("c1", "redis1").await.unwrap();
        store.list_services("c1").await.unwrap();
        assert_eq!(
            store.operations(),
            vec![StoreOp::Create {
                table: "services",
                key: "c1/redis1".into()
            }]
        );
    }

    #[tokio::test]
    async fn injected_failure_blocks_matching_keys() {
        let store = RecordingStore::in_memory().unwrap();
        store.inject_failure("c1/bad");
        assert!(matches!(
            store.create_service(&record("bad")).await,
            Err(StateError::Write(_))
        ));
        store.create_service(&record("good")).await.unwrap();
        assert!(store.get_service("c1", "bad").await.unwrap_err().is_not_found());
        assert_eq!(store.write_count(), 1);
    }
}
