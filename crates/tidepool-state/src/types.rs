//! Persisted metadata for services, members, config files, static IPs and
//! devices.
//!
//! Every record is serialized to JSON for storage. A service's UUID is the
//! join key for everything except the name record and devices, which are keyed
//! by cluster.

use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tidepool_core::{Resources, epoch_millis};

/// Default permission bits for generated config files.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

// ── Service ────────────────────────────────────────────────────────

/// Name-to-UUID binding for a service. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub cluster_name: String,
    pub service_name: String,
    pub service_uuid: String,
}

impl ServiceRecord {
    pub fn table_key(&self) -> String {
        service_key(&self.cluster_name, &self.service_name)
    }
}

pub fn service_key(cluster: &str, service_name: &str) -> String {
    format!("{cluster}/{service_name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Creating,
    Initializing,
    /// Fully initialized and serving.
    Active,
    Deleting,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Creating => "CREATING",
            ServiceStatus::Initializing => "INITIALIZING",
            ServiceStatus::Active => "ACTIVE",
            ServiceStatus::Deleting => "DELETING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub volume_type: String,
    pub size_gb: i64,
    pub iops: i64,
    pub encrypted: bool,
}

/// Volumes attached to every member. Stateless services leave these empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVolumes {
    pub primary_device_name: String,
    pub primary: VolumeSpec,
    pub journal_device_name: String,
    pub journal: Option<VolumeSpec>,
}

/// Mutable attributes of a service.
///
/// `user_attr` is owned by the catalog module of `service_type` and is opaque
/// to everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAttr {
    pub service_uuid: String,
    pub status: ServiceStatus,
    pub last_modified: u64,
    pub replicas: u64,
    pub cluster_name: String,
    pub service_name: String,
    pub volumes: ServiceVolumes,
    pub register_dns: bool,
    pub domain_name: String,
    pub hosted_zone_id: String,
    pub require_static_ip: bool,
    pub resource: Resources,
    pub service_type: String,
    pub user_attr: Vec<u8>,
}

impl ServiceAttr {
    /// Copy with a new status and a fresh modification time.
    pub fn with_status(&self, status: ServiceStatus) -> Self {
        Self {
            status,
            last_modified: epoch_millis(),
            ..self.clone()
        }
    }

    /// Copy with new module attributes and a fresh modification time.
    pub fn with_user_attr(&self, user_attr: Vec<u8>) -> Self {
        Self {
            user_attr,
            last_modified: epoch_millis(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ServiceAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "service {} uuid {} type {} status {} replicas {} domain {} static ip {} mtime {} user attr {} bytes",
            self.service_name,
            self.service_uuid,
            self.service_type,
            self.status,
            self.replicas,
            self.domain_name,
            self.require_static_ip,
            self.last_modified,
            self.user_attr.len()
        )
    }
}

// ── Member ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Pending,
    Active,
}

/// Reference from a member to one of its config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfig {
    pub file_name: String,
    pub file_id: String,
    pub file_md5: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberVolumes {
    pub primary_volume_id: String,
    pub primary_device_name: String,
    pub journal_volume_id: String,
    pub journal_device_name: String,
}

/// One replica of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMember {
    pub service_uuid: String,
    pub member_index: u64,
    pub status: MemberStatus,
    pub member_name: String,
    pub available_zone: String,
    pub task_id: String,
    pub container_instance_id: String,
    pub server_instance_id: String,
    pub last_modified: u64,
    pub volumes: MemberVolumes,
    pub static_ip: String,
    /// Ordered config file references, unique by `file_name`.
    pub configs: Vec<MemberConfig>,
}

impl ServiceMember {
    pub fn table_key(&self) -> String {
        member_key(&self.service_uuid, &self.member_name)
    }

    /// Locate the first config whose file name satisfies `is_role`.
    pub fn find_config(&self, is_role: impl Fn(&str) -> bool) -> Option<(usize, &MemberConfig)> {
        self.configs
            .iter()
            .enumerate()
            .find(|(_, cfg)| is_role(&cfg.file_name))
    }

    /// Copy with the config at `index` replaced and a fresh modification time.
    pub fn with_config(&self, index: usize, config: MemberConfig) -> Self {
        let mut member = self.clone();
        if let Some(slot) = member.configs.get_mut(index) {
            *slot = config;
        }
        member.last_modified = epoch_millis();
        member
    }
}

impl fmt::Display for ServiceMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "member {} index {} service {} zone {} static ip {} configs [",
            self.member_name, self.member_index, self.service_uuid, self.available_zone, self.static_ip
        )?;
        for (i, cfg) in self.configs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", cfg.file_name, cfg.file_id)?;
        }
        f.write_str("]")
    }
}

pub fn member_key(service_uuid: &str, member_name: &str) -> String {
    format!("{service_uuid}:{member_name}")
}

// ── Config file ────────────────────────────────────────────────────

/// Immutable config file content. A change always produces a new file id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub service_uuid: String,
    pub file_id: String,
    pub file_md5: String,
    pub file_name: String,
    pub file_mode: u32,
    pub last_modified: u64,
    pub content: String,
}

impl ConfigFile {
    pub fn new(
        service_uuid: impl Into<String>,
        file_id: impl Into<String>,
        file_name: impl Into<String>,
        file_mode: u32,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            service_uuid: service_uuid.into(),
            file_id: file_id.into(),
            file_md5: content_md5(&content),
            file_name: file_name.into(),
            file_mode,
            last_modified: epoch_millis(),
            content,
        }
    }

    pub fn table_key(&self) -> String {
        config_file_key(&self.service_uuid, &self.file_id)
    }

    /// Successor of this file carrying `content`, under the next version id.
    pub fn next_version(&self, content: impl Into<String>) -> Self {
        Self::new(
            self.service_uuid.clone(),
            next_config_file_id(&self.file_id),
            self.file_name.clone(),
            self.file_mode,
            content,
        )
    }

    pub fn member_config(&self) -> MemberConfig {
        MemberConfig {
            file_name: self.file_name.clone(),
            file_id: self.file_id.clone(),
            file_md5: self.file_md5.clone(),
        }
    }
}

impl fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "service {} file id {} name {} md5 {} mode {:o} mtime {}",
            self.service_uuid,
            self.file_id,
            self.file_name,
            self.file_md5,
            self.file_mode,
            self.last_modified
        )
    }
}

pub fn config_file_key(service_uuid: &str, file_id: &str) -> String {
    format!("{service_uuid}:{file_id}")
}

/// Hex MD5 digest of a config file's content.
pub fn content_md5(content: &str) -> String {
    hex::encode(Md5::digest(content.as_bytes()))
}

/// Id of the first version of a member's config file.
pub fn config_file_id(member_name: &str, file_name: &str, version: u64) -> String {
    format!("{member_name}-{file_name}-{version}")
}

/// Bump the trailing version of a config file id.
///
/// Ids without a numeric suffix are treated as version 0.
pub fn next_config_file_id(file_id: &str) -> String {
    match file_id.rsplit_once('-') {
        Some((prefix, version)) => match version.parse::<u64>() {
            Ok(v) => format!("{prefix}-{}", v + 1),
            Err(_) => format!("{file_id}-1"),
        },
        None => format!("{file_id}-1"),
    }
}

// ── Static IP ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStaticIP {
    pub static_ip: String,
    pub service_uuid: String,
    pub available_zone: String,
    pub server_instance_id: String,
    pub network_interface_id: String,
}

// ── Device ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub cluster_name: String,
    pub device_name: String,
    pub service_name: String,
}

impl Device {
    pub fn table_key(&self) -> String {
        device_key(&self.cluster_name, &self.device_name)
    }
}

pub fn device_key(cluster: &str, device_name: &str) -> String {
    format!("{cluster}/{device_name}")
}

// ── System tables ──────────────────────────────────────────────────

/// Provisioning state of the store's system tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    NotFound,
    Creating,
    Active,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::NotFound => "NOT_FOUND",
            TableStatus::Creating => "CREATING",
            TableStatus::Active => "ACTIVE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_content() {
        let cfg = ConfigFile::new("uuid-1", "redis-0-redis.conf-0", "redis.conf", DEFAULT_FILE_MODE, "port 6379\n");
        assert_eq!(cfg.file_md5, content_md5("port 6379\n"));
        assert_eq!(content_md5(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn next_version_bumps_id_and_md5() {
        let cfg = ConfigFile::new("u", config_file_id("redis-0", "redis.conf", 0), "redis.conf", DEFAULT_FILE_MODE, "a");
        let next = cfg.next_version("b");
        assert_eq!(next.file_id, "redis-0-redis.conf-1");
        assert_eq!(next.file_md5, content_md5("b"));
        assert_eq!(next.file_name, "redis.conf");
        assert_ne!(next.file_md5, cfg.file_md5);
    }

    #[test]
    fn next_id_without_version_suffix() {
        assert_eq!(next_config_file_id("custom"), "custom-1");
        assert_eq!(next_config_file_id("a-b-conf"), "a-b-conf-1");
        assert_eq!(next_config_file_id("m-f-41"), "m-f-42");
    }

    #[test]
    fn config_file_display_omits_content() {
        let cfg = ConfigFile::new("u", "id", "redis.conf", DEFAULT_FILE_MODE, "requirepass secret");
        let printed = cfg.to_string();
        assert!(printed.contains("redis.conf"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn find_config_by_role() {
        let member = ServiceMember {
            service_uuid: "u".into(),
            member_index: 0,
            status: MemberStatus::Active,
            member_name: "redis-0".into(),
            available_zone: "az-a".into(),
            task_id: String::new(),
            container_instance_id: String::new(),
            server_instance_id: String::new(),
            last_modified: 0,
            volumes: MemberVolumes::default(),
            static_ip: String::new(),
            configs: vec![
                MemberConfig {
                    file_name: "member.conf".into(),
                    file_id: "m".into(),
                    file_md5: "x".into(),
                },
                MemberConfig {
                    file_name: "redis.conf".into(),
                    file_id: "r".into(),
                    file_md5: "y".into(),
                },
            ],
        };
        let (idx, cfg) = member.find_config(|name| name == "redis.conf").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(cfg.file_id, "r");
        assert!(member.find_config(|name| name == "nope").is_none());
    }

    #[test]
    fn status_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&ServiceStatus::Initializing).unwrap(), "\"INITIALIZING\"");
    }
}
