//! Shared types and naming conventions used across Tidepool crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Name of the system, used as a prefix for images and DNS domains.
pub const SYSTEM_NAME: &str = "tidepool";

/// Separator used in generated names.
pub const NAME_SEPARATOR: &str = "-";

/// Container image organization prefix.
pub const CONTAINER_IMAGE_PREFIX: &str = "tidepool/";

/// Default port the manage server listens on.
pub const DEFAULT_MANAGE_PORT: u16 = 27040;

/// Service name of the embedded control database.
pub const CONTROL_DB_SERVICE_NAME: &str = "tidepool-controldb";

/// Container image of the embedded control database.
pub const CONTROL_DB_CONTAINER_IMAGE: &str = "tidepool/tidepool-controldb:latest";

/// Port the embedded control database serves on.
pub const CONTROL_DB_SERVER_PORT: u16 = 27030;

/// Default time to wait for a backing resource to become ready.
pub const DEFAULT_SERVICE_WAIT_SECS: u64 = 120;

/// Default interval between readiness polls.
pub const DEFAULT_RETRY_WAIT_SECS: u64 = 5;

pub const ENV_REGION: &str = "REGION";
pub const ENV_CLUSTER: &str = "CLUSTER";
pub const ENV_SERVICE_NAME: &str = "SERVICE_NAME";
pub const ENV_CONTAINER_PLATFORM: &str = "CONTAINER_PLATFORM";
pub const ENV_MANAGE_URL: &str = "MANAGE_SERVER_URL";

/// Container platform the manage server drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Ecs,
    Swarm,
    K8s,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Ecs => "ecs",
            PlatformKind::Swarm => "swarm",
            PlatformKind::K8s => "k8s",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ecs" => Ok(PlatformKind::Ecs),
            "swarm" => Ok(PlatformKind::Swarm),
            "k8s" => Ok(PlatformKind::K8s),
            other => Err(format!("unsupported container platform: {other}")),
        }
    }
}

/// Metadata store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// Cloud-hosted tables that may still be in a "creating" state at start-up.
    CloudDb,
    /// Control database running as a container service in the cluster.
    ControlDb,
    /// Config-map style store on Kubernetes.
    K8sDb,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::CloudDb => "clouddb",
            DbType::ControlDb => "controldb",
            DbType::K8sDb => "k8sdb",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clouddb" => Ok(DbType::CloudDb),
            "controldb" => Ok(DbType::ControlDb),
            "k8sdb" => Ok(DbType::K8sDb),
            other => Err(format!("unsupported db type: {other}")),
        }
    }
}

/// CPU and memory limits for a service's containers.
///
/// CPU is expressed in platform units (1024 per core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Resources {
    pub max_cpu_units: i64,
    pub reserve_cpu_units: i64,
    pub max_mem_mb: i64,
    pub reserve_mem_mb: i64,
}

impl Resources {
    /// Check that reservations do not exceed limits. `-1` means unlimited.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cpu_units != -1 && self.reserve_cpu_units > self.max_cpu_units {
            return Err(format!(
                "reserve cpu units {} exceeds max cpu units {}",
                self.reserve_cpu_units, self.max_cpu_units
            ));
        }
        if self.max_mem_mb != -1 && self.reserve_mem_mb > self.max_mem_mb {
            return Err(format!(
                "reserve memory {}MB exceeds max memory {}MB",
                self.reserve_mem_mb, self.max_mem_mb
            ));
        }
        if self.reserve_cpu_units < 0 || self.reserve_mem_mb < 0 {
            return Err("reservations must not be negative".to_string());
        }
        Ok(())
    }
}

/// An environment variable passed to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvKeyValuePair {
    pub name: String,
    pub value: String,
}

impl EnvKeyValuePair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A container-to-host port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

/// Default DNS domain for services in a cluster.
pub fn default_domain_name(cluster: &str) -> String {
    format!("{cluster}{NAME_SEPARATOR}{SYSTEM_NAME}.com")
}

/// Default DNS name of the manage server in a cluster.
pub fn default_manage_dns_name(cluster: &str) -> String {
    format!("{SYSTEM_NAME}{NAME_SEPARATOR}manageserver.{}", default_domain_name(cluster))
}

/// DNS name of a service member.
pub fn member_dns_name(member_name: &str, domain: &str) -> String {
    format!("{member_name}.{domain}")
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parse_and_display() {
        for kind in [PlatformKind::Ecs, PlatformKind::Swarm, PlatformKind::K8s] {
            assert_eq!(kind.to_string().parse::<PlatformKind>().unwrap(), kind);
        }
        assert!("nomad".parse::<PlatformKind>().is_err());
    }

    #[test]
    fn db_type_parse() {
        assert_eq!("clouddb".parse::<DbType>().unwrap(), DbType::CloudDb);
        assert_eq!("controldb".parse::<DbType>().unwrap(), DbType::ControlDb);
        assert_eq!("k8sdb".parse::<DbType>().unwrap(), DbType::K8sDb);
        assert!("mysql".parse::<DbType>().is_err());
    }

    #[test]
    fn resources_reject_reserve_over_max() {
        let res = Resources {
            max_cpu_units: 512,
            reserve_cpu_units: 1024,
            max_mem_mb: 1024,
            reserve_mem_mb: 256,
        };
        assert!(res.validate().is_err());
    }

    #[test]
    fn resources_unlimited_max() {
        let res = Resources {
            max_cpu_units: -1,
            reserve_cpu_units: 256,
            max_mem_mb: -1,
            reserve_mem_mb: 4096,
        };
        assert!(res.validate().is_ok());
    }

    #[test]
    fn dns_names() {
        assert_eq!(default_domain_name("c1"), "c1-tidepool.com");
        assert_eq!(member_dns_name("redis-0", "c1-tidepool.com"), "redis-0.c1-tidepool.com");
        assert_eq!(
            default_manage_dns_name("c1"),
            "tidepool-manageserver.c1-tidepool.com"
        );
    }
}
