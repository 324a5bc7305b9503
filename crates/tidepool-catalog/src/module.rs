//! The contract every service type implements.
//!
//! Modules are pure: they turn request options into a creation plan and
//! rewrite config file content, but never touch the metadata store or the
//! container platform. Options arrive as raw JSON and each module decodes them
//! into its own typed options.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tidepool_core::{
    ENV_CLUSTER, ENV_CONTAINER_PLATFORM, ENV_REGION, ENV_SERVICE_NAME, EnvKeyValuePair,
    PlatformKind, PortMapping, Resources,
};
use tidepool_state::{ServiceAttr, ServiceMember, ServiceVolumes};

use crate::error::{CatalogError, CatalogResult};

/// Where a new service is being created.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub region: String,
    pub cluster: String,
    pub service_name: String,
    pub platform: PlatformKind,
    pub zones: Vec<String>,
    pub domain_name: String,
    pub manage_url: String,
}

impl ServiceIdentity {
    /// Env pairs every container of the service receives.
    pub fn base_envs(&self) -> Vec<EnvKeyValuePair> {
        vec![
            EnvKeyValuePair::new(ENV_REGION, &self.region),
            EnvKeyValuePair::new(ENV_CLUSTER, &self.cluster),
            EnvKeyValuePair::new(ENV_SERVICE_NAME, &self.service_name),
            EnvKeyValuePair::new(ENV_CONTAINER_PLATFORM, self.platform.as_str()),
        ]
    }

    /// Zone for the `n`th replica, spreading replicas round-robin.
    pub fn zone_for(&self, n: usize) -> String {
        if self.zones.is_empty() {
            return String::new();
        }
        self.zones[n % self.zones.len()].clone()
    }
}

/// A service another service depends on, such as the target of a monitor.
#[derive(Debug, Clone)]
pub struct MonitoredService {
    pub attr: ServiceAttr,
    pub members: Vec<ServiceMember>,
    /// Env pairs the monitored service's own module exposes to agents.
    pub envs: Vec<EnvKeyValuePair>,
}

/// Input to [`CatalogModule::generate_create_plan`].
#[derive(Debug, Clone)]
pub struct CreateContext<'a> {
    pub identity: &'a ServiceIdentity,
    pub resource: Resources,
    pub options: &'a Value,
    pub monitored: Option<MonitoredService>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfigFile {
    pub file_name: String,
    pub file_mode: u32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfig {
    pub member_name: String,
    pub zone: String,
    pub configs: Vec<ReplicaConfigFile>,
}

/// The one-shot container that finishes bringing a service up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitTaskSpec {
    pub task_type: String,
    pub container_image: String,
    pub envs: Vec<EnvKeyValuePair>,
}

#[derive(Debug, Clone)]
pub struct ServiceCreationPlan {
    pub container_image: String,
    pub resource: Resources,
    pub replicas: u64,
    pub port_mappings: Vec<PortMapping>,
    pub envs: Vec<EnvKeyValuePair>,
    pub register_dns: bool,
    pub require_static_ip: bool,
    pub volumes: ServiceVolumes,
    pub replica_configs: Vec<ReplicaConfig>,
    pub user_attr: Vec<u8>,
    pub init_task: Option<InitTaskSpec>,
}

/// An idempotent rewrite of one member's config file.
///
/// `needs_apply` must report `false` once `apply` has taken effect, so a
/// retried pass writes nothing for members that were already updated.
pub trait ConfigMutation: Send + Sync {
    /// Short description, also used as the init task status message.
    fn name(&self) -> &str;
    fn needs_apply(&self, content: &str, member: &ServiceMember) -> bool;
    fn apply(&self, content: &str, member: &ServiceMember) -> CatalogResult<String>;
}

pub trait CatalogModule: Send + Sync {
    fn service_type(&self) -> &'static str;

    fn validate_create(&self, options: &Value) -> CatalogResult<()>;

    /// Name of another service whose attributes the plan needs.
    fn monitored_service(&self, _options: &Value) -> CatalogResult<Option<String>> {
        Ok(None)
    }

    fn generate_create_plan(&self, ctx: &CreateContext<'_>) -> CatalogResult<ServiceCreationPlan>;

    fn validate_update(&self, options: &Value) -> CatalogResult<()>;

    fn is_config_changed(&self, user_attr: &[u8], options: &Value) -> CatalogResult<bool>;

    fn update_config_content(
        &self,
        old_content: &str,
        user_attr: &[u8],
        options: &Value,
    ) -> CatalogResult<String>;

    fn update_user_attr(&self, user_attr: &[u8], options: &Value) -> CatalogResult<Vec<u8>>;

    /// Whether `file_name` is the config file that updates rewrite.
    fn is_primary_config(&self, file_name: &str) -> bool;

    /// Mutations applied after members are stored and before the service starts.
    fn pre_create_mutations(&self, _user_attr: &[u8]) -> CatalogResult<Vec<Box<dyn ConfigMutation>>> {
        Ok(Vec::new())
    }

    /// Mutations applied when initialization completes, in order.
    fn init_mutations(&self, _user_attr: &[u8]) -> CatalogResult<Vec<Box<dyn ConfigMutation>>> {
        Ok(Vec::new())
    }

    /// User attributes as shown to API clients. Credentials are masked.
    fn public_user_attr(&self, user_attr: &[u8]) -> CatalogResult<Value> {
        decode_user_attr(self.service_type(), user_attr)
    }

    /// Env pairs an agent monitoring this service needs, such as credentials.
    fn monitor_envs(&self, _user_attr: &[u8]) -> CatalogResult<Vec<EnvKeyValuePair>> {
        Ok(Vec::new())
    }
}

/// Shown in place of a credential.
pub const REDACTED: &str = "******";

pub(crate) fn parse_options<T: DeserializeOwned>(options: &Value) -> CatalogResult<T> {
    T::deserialize(options).map_err(|e| CatalogError::InvalidOptions(e.to_string()))
}

pub(crate) fn decode_user_attr<T: DeserializeOwned>(
    service_type: &str,
    user_attr: &[u8],
) -> CatalogResult<T> {
    serde_json::from_slice(user_attr).map_err(|e| CatalogError::CorruptUserAttr {
        service_type: service_type.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn encode_user_attr<T: Serialize>(service_type: &str, attr: &T) -> CatalogResult<Vec<u8>> {
    serde_json::to_vec(attr).map_err(|e| CatalogError::CorruptUserAttr {
        service_type: service_type.to_string(),
        reason: e.to_string(),
    })
}

/// Set directive `key` to `value` on every line that carries it, keeping a
/// leading `# ` marker when present. Appends the directive when no line has
/// it. `None` removes the directive.
pub(crate) fn replace_directive(content: &str, key: &str, value: Option<&str>) -> String {
    let mut out = Vec::new();
    let mut found = false;
    for line in content.lines() {
        let (commented, body) = match line.strip_prefix("# ") {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let matches = body == key || body.starts_with(&format!("{key} "));
        if !matches {
            out.push(line.to_string());
            continue;
        }
        found = true;
        if let Some(value) = value {
            let prefix = if commented { "# " } else { "" };
            out.push(format!("{prefix}{key} {value}"));
        }
    }
    if !found {
        if let Some(value) = value {
            out.push(format!("{key} {value}"));
        }
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}
