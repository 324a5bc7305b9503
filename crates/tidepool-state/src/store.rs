//! StateStore: redb-backed implementation of [`MetadataStore`].
//!
//! Every value is JSON-serialized into a `&[u8]` column. Creates and
//! conditional updates check the current value inside the same write
//! transaction, so they are atomic with respect to other callers of the same
//! store. Supports on-disk and in-memory backends.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::db::MetadataStore;
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe metadata store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in ALL_TABLES {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn insert_new<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let exists = t.get(key).map_err(map_err!(Read))?.is_some();
            if exists {
                return Err(StateError::RecordExists(format!("{} {key}", table.name())));
            }
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = table.name(), %key, "record created");
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<T> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let value = match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            None => return Err(StateError::NotFound(format!("{} {key}", table.name()))),
        };
        Ok(value)
    }

    fn list_prefix<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Replace `old` with `new` only if the stored value still equals `old`.
    fn compare_and_swap<T>(&self, table: JsonTable, key: &str, old: &T, new: &T) -> StateResult<()>
    where
        T: Serialize + DeserializeOwned + PartialEq,
    {
        let bytes = serde_json::to_vec(new).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let current: Option<T> = match t.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match current {
                None => return Err(StateError::NotFound(format!("{} {key}", table.name()))),
                Some(current) if &current != old => {
                    return Err(StateError::Conflict(format!(
                        "{} {key} was modified concurrently",
                        table.name()
                    )));
                }
                Some(_) => {}
            }
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = table.name(), %key, "record updated");
        Ok(())
    }

    fn remove(&self, table: JsonTable, key: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        if !existed {
            return Err(StateError::NotFound(format!("{} {key}", table.name())));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = table.name(), %key, "record deleted");
        Ok(())
    }

    fn put<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

fn ensure_same_key(table: &str, old: &str, new: &str) -> StateResult<()> {
    if old != new {
        return Err(StateError::Conflict(format!(
            "{table} key cannot change from {old} to {new}"
        )));
    }
    Ok(())
}

#[async_trait]
impl MetadataStore for StateStore {
    // ── System tables ──────────────────────────────────────────────

    async fn create_system_tables(&self) -> StateResult<()> {
        // redb creates tables synchronously, so they are usable at once.
        self.put(SYSTEM, SYSTEM_TABLES_KEY, &TableStatus::Active)
    }

    async fn system_tables_ready(&self) -> StateResult<(TableStatus, bool)> {
        match self.get_value::<TableStatus>(SYSTEM, SYSTEM_TABLES_KEY) {
            Ok(status) => Ok((status, status == TableStatus::Active)),
            Err(StateError::NotFound(_)) => Ok((TableStatus::NotFound, false)),
            Err(e) => Err(e),
        }
    }

    // ── Devices ────────────────────────────────────────────────────

    async fn create_device(&self, dev: &Device) -> StateResult<()> {
        self.insert_new(DEVICES, &dev.table_key(), dev)
    }

    async fn get_device(&self, cluster: &str, device_name: &str) -> StateResult<Device> {
        self.get_value(DEVICES, &device_key(cluster, device_name))
    }

    async fn list_devices(&self, cluster: &str) -> StateResult<Vec<Device>> {
        self.list_prefix(DEVICES, &format!("{cluster}/"))
    }

    async fn delete_device(&self, cluster: &str, device_name: &str) -> StateResult<()> {
        self.remove(DEVICES, &device_key(cluster, device_name))
    }

    // ── Services ───────────────────────────────────────────────────

    async fn create_service(&self, svc: &ServiceRecord) -> StateResult<()> {
        self.insert_new(SERVICES, &svc.table_key(), svc)
    }

    async fn get_service(&self, cluster: &str, service_name: &str) -> StateResult<ServiceRecord> {
        self.get_value(SERVICES, &service_key(cluster, service_name))
    }

    async fn list_services(&self, cluster: &str) -> StateResult<Vec<ServiceRecord>> {
        self.list_prefix(SERVICES, &format!("{cluster}/"))
    }

    async fn delete_service(&self, cluster: &str, service_name: &str) -> StateResult<()> {
        self.remove(SERVICES, &service_key(cluster, service_name))
    }

    // ── Service attributes ─────────────────────────────────────────

    async fn create_service_attr(&self, attr: &ServiceAttr) -> StateResult<()> {
        self.insert_new(SERVICE_ATTRS, &attr.service_uuid, attr)
    }

    async fn get_service_attr(&self, service_uuid: &str) -> StateResult<ServiceAttr> {
        self.get_value(SERVICE_ATTRS, service_uuid)
    }

    async fn update_service_attr(&self, old: &ServiceAttr, new: &ServiceAttr) -> StateResult<()> {
        ensure_same_key("service attr", &old.service_uuid, &new.service_uuid)?;
        self.compare_and_swap(SERVICE_ATTRS, &old.service_uuid, old, new)
    }

    async fn delete_service_attr(&self, service_uuid: &str) -> StateResult<()> {
        self.remove(SERVICE_ATTRS, service_uuid)
    }

    // ── Members ────────────────────────────────────────────────────

    async fn create_service_member(&self, member: &ServiceMember) -> StateResult<()> {
        self.insert_new(MEMBERS, &member.table_key(), member)
    }

    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> StateResult<ServiceMember> {
        self.get_value(MEMBERS, &member_key(service_uuid, member_name))
    }

    async fn list_service_members(&self, service_uuid: &str) -> StateResult<Vec<ServiceMember>> {
        let mut members: Vec<ServiceMember> =
            self.list_prefix(MEMBERS, &format!("{service_uuid}:"))?;
        members.sort_by_key(|m| m.member_index);
        Ok(members)
    }

    async fn update_service_member(
        &self,
        old: &ServiceMember,
        new: &ServiceMember,
    ) -> StateResult<()> {
        let key = old.table_key();
        ensure_same_key("member", &key, &new.table_key())?;
        self.compare_and_swap(MEMBERS, &key, old, new)
    }

    async fn delete_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> StateResult<()> {
        self.remove(MEMBERS, &member_key(service_uuid, member_name))
    }

    // ── Config files ───────────────────────────────────────────────

    async fn create_config_file(&self, cfg: &ConfigFile) -> StateResult<()> {
        if cfg.file_md5 != content_md5(&cfg.content) {
            return Err(StateError::InvalidRecord(format!(
                "config file {} md5 does not match its content",
                cfg.file_id
            )));
        }
        self.insert_new(CONFIG_FILES, &cfg.table_key(), cfg)
    }

    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> StateResult<ConfigFile> {
        self.get_value(CONFIG_FILES, &config_file_key(service_uuid, file_id))
    }

    async fn list_config_files(&self, service_uuid: &str) -> StateResult<Vec<ConfigFile>> {
        self.list_prefix(CONFIG_FILES, &format!("{service_uuid}:"))
    }

    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> StateResult<()> {
        self.remove(CONFIG_FILES, &config_file_key(service_uuid, file_id))
    }

    // ── Static IPs ─────────────────────────────────────────────────

    async fn create_service_static_ip(&self, ip: &ServiceStaticIP) -> StateResult<()> {
        self.insert_new(STATIC_IPS, &ip.static_ip, ip)
    }

    async fn get_service_static_ip(&self, static_ip: &str) -> StateResult<ServiceStaticIP> {
        self.get_value(STATIC_IPS, static_ip)
    }

    async fn list_service_static_ips(
        &self,
        service_uuid: &str,
    ) -> StateResult<Vec<ServiceStaticIP>> {
        let all: Vec<ServiceStaticIP> = self.list_prefix(STATIC_IPS, "")?;
        Ok(all
            .into_iter()
            .filter(|ip| ip.service_uuid == service_uuid)
            .collect())
    }

    async fn update_service_static_ip(
        &self,
        old: &ServiceStaticIP,
        new: &ServiceStaticIP,
    ) -> StateResult<()> {
        ensure_same_key("static ip", &old.static_ip, &new.static_ip)?;
        self.compare_and_swap(STATIC_IPS, &old.static_ip, old, new)
    }

    async fn delete_service_static_ip(&self, static_ip: &str) -> StateResult<()> {
        self.remove(STATIC_IPS, static_ip)
    }
}
