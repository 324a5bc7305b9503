//! redb table definitions for the metadata store.
//!
//! Keys are `&str`, values are JSON-encoded records. Child records use
//! `{service_uuid}:{id}` keys so they can be listed by prefix.

use redb::TableDefinition;

pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Devices keyed by `{cluster}/{device_name}`.
pub const DEVICES: JsonTable = TableDefinition::new("devices");

/// Service records keyed by `{cluster}/{service_name}`.
pub const SERVICES: JsonTable = TableDefinition::new("services");

/// Service attributes keyed by `{service_uuid}`.
pub const SERVICE_ATTRS: JsonTable = TableDefinition::new("service_attrs");

/// Members keyed by `{service_uuid}:{member_name}`.
pub const MEMBERS: JsonTable = TableDefinition::new("members");

/// Config files keyed by `{service_uuid}:{file_id}`.
pub const CONFIG_FILES: JsonTable = TableDefinition::new("config_files");

/// Static IPs keyed by the address.
pub const STATIC_IPS: JsonTable = TableDefinition::new("static_ips");

/// Store bookkeeping, such as the system table status.
pub const SYSTEM: JsonTable = TableDefinition::new("system");

pub(crate) const ALL_TABLES: [JsonTable; 7] = [
    DEVICES,
    SERVICES,
    SERVICE_ATTRS,
    MEMBERS,
    CONFIG_FILES,
    STATIC_IPS,
    SYSTEM,
];

pub(crate) const SYSTEM_TABLES_KEY: &str = "system_tables";
