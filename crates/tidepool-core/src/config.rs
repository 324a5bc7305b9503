//! Manage-server configuration.
//!
//! The daemon builds a [`ManageConfig`] from command-line flags, optionally
//! layered over a TOML file, and validates it before anything is started.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    DEFAULT_MANAGE_PORT, DEFAULT_RETRY_WAIT_SECS, DEFAULT_SERVICE_WAIT_SECS, DbType, PlatformKind,
    default_manage_dns_name,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManageConfig {
    pub platform: PlatformKind,
    pub db_type: DbType,
    pub cluster: String,
    pub region: String,
    pub availability_zones: Vec<String>,
    /// DNS name of the manage server. Defaults to the cluster's manage name.
    pub dns_name: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub tls: Option<TlsFiles>,
    #[serde(default)]
    pub wait: WaitConfig,
}

/// TLS material for the manage server. All three files are required together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl TlsFiles {
    /// Assemble TLS settings from individually supplied flags.
    ///
    /// Returns `None` when TLS is disabled, and an error when it is enabled
    /// with any of the three files missing.
    pub fn from_flags(
        enabled: bool,
        ca_file: Option<PathBuf>,
        cert_file: Option<PathBuf>,
        key_file: Option<PathBuf>,
    ) -> Result<Option<Self>, ConfigError> {
        if !enabled {
            return Ok(None);
        }
        match (ca_file, cert_file, key_file) {
            (Some(ca_file), Some(cert_file), Some(key_file)) => Ok(Some(Self {
                ca_file,
                cert_file,
                key_file,
            })),
            _ => Err(ConfigError::Invalid(
                "tls requires the ca, cert and key files together".to_string(),
            )),
        }
    }
}

/// Bounds for the bootstrap readiness waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_RETRY_WAIT_SECS,
            timeout_secs: DEFAULT_SERVICE_WAIT_SECS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_MANAGE_PORT
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/tidepool")
}

impl ManageConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ManageConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.is_empty() {
            return Err(ConfigError::Invalid("cluster name is not set".to_string()));
        }
        if self.region.is_empty() {
            return Err(ConfigError::Invalid("region is not set".to_string()));
        }
        if self.availability_zones.is_empty()
            || self.availability_zones.iter().any(|z| z.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "please specify the availability zones for the system".to_string(),
            ));
        }
        if self.wait.interval_secs == 0 || self.wait.interval_secs > self.wait.timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "wait interval {}s must be positive and within the timeout {}s",
                self.wait.interval_secs, self.wait.timeout_secs
            )));
        }
        Ok(())
    }

    pub fn manage_dns_name(&self) -> String {
        self.dns_name
            .clone()
            .unwrap_or_else(|| default_manage_dns_name(&self.cluster))
    }

    /// URL init containers use to reach the manage server.
    pub fn manage_url(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://{}:{}/", self.manage_dns_name(), self.port)
    }
}

/// Split a comma-separated availability zone list.
pub fn parse_zones(zones: &str) -> Vec<String> {
    zones
        .split(',')
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .map(str::to_string)
        .collect()
}
