//! Redis catalog module.
//!
//! One shard runs a single master, optionally with slaves. Three or more
//! shards run Redis cluster mode, which pins members to static IPs, announces
//! them through `cluster-announce-ip`, and keeps authentication commented out
//! until the init task has formed the cluster.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidepool_core::{
    CONTAINER_IMAGE_PREFIX, ENV_MANAGE_URL, EnvKeyValuePair, PortMapping, member_dns_name,
};
use tidepool_state::{DEFAULT_FILE_MODE, ServiceMember, ServiceVolumes, VolumeSpec};
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use crate::module::*;

pub const REDIS_SERVICE_TYPE: &str = "redis";
pub const REDIS_CONF_FILE: &str = "redis.conf";
pub const MEMBER_CONF_FILE: &str = "member.conf";
pub const ENV_REDIS_AUTH: &str = "REDIS_AUTH";

const VERSION: &str = "4.0";
const LISTEN_PORT: u16 = 6379;
const CLUSTER_BUS_PORT: u16 = 16379;
const MIN_CLUSTER_SHARDS: u64 = 3;
const MIN_REPL_TIMEOUT_SECS: u64 = 60;
const INIT_TASK_TYPE: &str = "init";
const ENV_SHARDS: &str = "SHARDS";
const ENV_REPLICAS_PER_SHARD: &str = "REPLICAS_PERSHARD";
const ENV_SERVICE_MEMBERS: &str = "SERVICE_MEMBERS";
const ANNOUNCE_IP_PLACEHOLDER: &str = "# cluster-announce-ip";

const MAX_MEMORY_POLICIES: [&str; 8] = [
    "volatile-lru",
    "allkeys-lru",
    "volatile-lfu",
    "allkeys-lfu",
    "volatile-random",
    "allkeys-random",
    "volatile-ttl",
    "noeviction",
];

fn default_repl_timeout() -> u64 {
    MIN_REPL_TIMEOUT_SECS
}

fn default_max_memory_policy() -> String {
    "allkeys-lru".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisOptions {
    pub shards: u64,
    pub replicas_per_shard: u64,
    pub memory_cache_size_mb: i64,
    pub volume_size_gb: i64,
    #[serde(default)]
    pub disable_aof: bool,
    #[serde(default)]
    pub auth_pass: String,
    #[serde(default = "default_repl_timeout")]
    pub repl_timeout_secs: u64,
    #[serde(default = "default_max_memory_policy")]
    pub max_memory_policy: String,
    /// New name for the CONFIG command. Empty keeps it enabled under its own name.
    #[serde(default)]
    pub config_cmd_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisUpdateOptions {
    pub memory_cache_size_mb: Option<i64>,
    pub auth_pass: Option<String>,
    pub max_memory_policy: Option<String>,
    pub config_cmd_name: Option<String>,
    pub repl_timeout_secs: Option<u64>,
}

/// Settings persisted with the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisUserAttr {
    pub shards: u64,
    pub replicas_per_shard: u64,
    pub memory_cache_size_mb: i64,
    pub disable_aof: bool,
    pub auth_pass: String,
    pub repl_timeout_secs: u64,
    pub max_memory_policy: String,
    pub config_cmd_name: String,
}

impl From<&RedisOptions> for RedisUserAttr {
    fn from(opts: &RedisOptions) -> Self {
        Self {
            shards: opts.shards,
            replicas_per_shard: opts.replicas_per_shard,
            memory_cache_size_mb: opts.memory_cache_size_mb,
            disable_aof: opts.disable_aof,
            auth_pass: opts.auth_pass.clone(),
            repl_timeout_secs: opts.repl_timeout_secs,
            max_memory_policy: opts.max_memory_policy.clone(),
            config_cmd_name: opts.config_cmd_name.clone(),
        }
    }
}

impl RedisUserAttr {
    pub fn is_cluster_mode(&self) -> bool {
        is_cluster_mode(self.shards)
    }
}

pub fn is_cluster_mode(shards: u64) -> bool {
    shards >= MIN_CLUSTER_SHARDS
}

fn invalid(msg: impl Into<String>) -> CatalogError {
    CatalogError::InvalidOptions(msg.into())
}

fn check_memory(mb: i64) -> CatalogResult<()> {
    if mb <= 0 {
        return Err(invalid("memory cache size must be positive"));
    }
    Ok(())
}

fn check_repl_timeout(secs: u64) -> CatalogResult<()> {
    if secs < MIN_REPL_TIMEOUT_SECS {
        return Err(invalid(format!(
            "repl timeout must be at least {MIN_REPL_TIMEOUT_SECS} seconds"
        )));
    }
    Ok(())
}

fn check_policy(policy: &str) -> CatalogResult<()> {
    if !MAX_MEMORY_POLICIES.contains(&policy) {
        return Err(invalid(format!("unsupported max memory policy {policy}")));
    }
    Ok(())
}

fn check_token(what: &str, value: &str) -> CatalogResult<()> {
    if value.chars().any(|c| c.is_whitespace() || c == '"') {
        return Err(invalid(format!("{what} must not contain whitespace or quotes")));
    }
    Ok(())
}

impl RedisOptions {
    pub fn validate(&self) -> CatalogResult<()> {
        if self.shards == 0 {
            return Err(invalid("shards must be at least 1"));
        }
        if self.shards > 1 && !is_cluster_mode(self.shards) {
            return Err(invalid(format!(
                "cluster mode requires at least {MIN_CLUSTER_SHARDS} shards"
            )));
        }
        if self.replicas_per_shard == 0 {
            return Err(invalid("replicas per shard must be at least 1"));
        }
        check_memory(self.memory_cache_size_mb)?;
        if self.volume_size_gb <= 0 {
            return Err(invalid("volume size must be positive"));
        }
        check_repl_timeout(self.repl_timeout_secs)?;
        check_policy(&self.max_memory_policy)?;
        check_token("auth pass", &self.auth_pass)?;
        check_token("config command name", &self.config_cmd_name)
    }
}

impl RedisUpdateOptions {
    pub fn validate(&self) -> CatalogResult<()> {
        if let Some(mb) = self.memory_cache_size_mb {
            check_memory(mb)?;
        }
        if let Some(secs) = self.repl_timeout_secs {
            check_repl_timeout(secs)?;
        }
        if let Some(policy) = &self.max_memory_policy {
            check_policy(policy)?;
        }
        if let Some(pass) = &self.auth_pass {
            check_token("auth pass", pass)?;
        }
        if let Some(name) = &self.config_cmd_name {
            check_token("config command name", name)?;
        }
        Ok(())
    }

    fn is_changed(&self, ua: &RedisUserAttr) -> bool {
        self.memory_cache_size_mb
            .is_some_and(|v| v != ua.memory_cache_size_mb)
            || self.auth_pass.as_ref().is_some_and(|v| *v != ua.auth_pass)
            || self
                .max_memory_policy
                .as_ref()
                .is_some_and(|v| *v != ua.max_memory_policy)
            || self
                .config_cmd_name
                .as_ref()
                .is_some_and(|v| *v != ua.config_cmd_name)
            || self
                .repl_timeout_secs
                .is_some_and(|v| v != ua.repl_timeout_secs)
    }

    fn merge(&self, ua: &RedisUserAttr) -> RedisUserAttr {
        let mut merged = ua.clone();
        if let Some(v) = self.memory_cache_size_mb {
            merged.memory_cache_size_mb = v;
        }
        if let Some(v) = &self.auth_pass {
            merged.auth_pass = v.clone();
        }
        if let Some(v) = &self.max_memory_policy {
            merged.max_memory_policy = v.clone();
        }
        if let Some(v) = &self.config_cmd_name {
            merged.config_cmd_name = v.clone();
        }
        if let Some(v) = self.repl_timeout_secs {
            merged.repl_timeout_secs = v;
        }
        merged
    }
}

fn member_name(service: &str, shard: u64, replica: u64) -> String {
    format!("{service}-shard{shard}-{replica}")
}

fn rename_config_value(name: &str) -> Option<String> {
    if name.is_empty() {
        None
    } else {
        Some(format!("CONFIG \"{name}\""))
    }
}

fn render_redis_conf(ua: &RedisUserAttr, master: Option<&str>) -> String {
    let mut conf = String::new();
    conf.push_str("bind 0.0.0.0\n");
    conf.push_str(&format!("port {LISTEN_PORT}\n"));
    conf.push_str("dir /data/redis\n");
    conf.push_str(&format!("maxmemory {}mb\n", ua.memory_cache_size_mb));
    conf.push_str(&format!("maxmemory-policy {}\n", ua.max_memory_policy));
    conf.push_str(&format!("repl-timeout {}\n", ua.repl_timeout_secs));
    if ua.disable_aof {
        conf.push_str("appendonly no\n");
    } else {
        conf.push_str("appendonly yes\nappendfsync everysec\n");
    }
    if let Some(value) = rename_config_value(&ua.config_cmd_name) {
        conf.push_str(&format!("rename-command {value}\n"));
    }
    if !ua.auth_pass.is_empty() {
        // Cluster members must be able to meet unauthenticated during init.
        let prefix = if ua.is_cluster_mode() { "# " } else { "" };
        conf.push_str(&format!("{prefix}requirepass {}\n", ua.auth_pass));
        conf.push_str(&format!("{prefix}masterauth {}\n", ua.auth_pass));
    }
    if let Some(master) = master {
        conf.push_str(&format!("slaveof {master} {LISTEN_PORT}\n"));
    }
    if ua.is_cluster_mode() {
        conf.push_str("cluster-enabled yes\n");
        conf.push_str("cluster-config-file /data/redis/redis-node.conf\n");
        conf.push_str("cluster-node-timeout 15000\n");
        conf.push_str(ANNOUNCE_IP_PLACEHOLDER);
        conf.push('\n');
    }
    conf
}

fn render_member_conf(member: &str, shard: u64, replica: u64) -> String {
    format!("MEMBER_NAME={member}\nSHARD={shard}\nSHARD_MEMBER={replica}\n")
}

fn is_redis_conf(file_name: &str) -> bool {
    file_name == REDIS_CONF_FILE
}

/// Writes the member's static IP into the announce placeholder.
struct SetClusterAnnounceIp;

impl ConfigMutation for SetClusterAnnounceIp {
    fn name(&self) -> &str {
        "set cluster announce ip"
    }

    fn needs_apply(&self, content: &str, _member: &ServiceMember) -> bool {
        content.lines().any(|l| l == ANNOUNCE_IP_PLACEHOLDER)
    }

    fn apply(&self, content: &str, member: &ServiceMember) -> CatalogResult<String> {
        if member.static_ip.is_empty() {
            return Err(CatalogError::Mutation {
                member: member.member_name.clone(),
                reason: "no static ip assigned".to_string(),
            });
        }
        let announce = format!("cluster-announce-ip {}", member.static_ip);
        let mut out: Vec<&str> = Vec::new();
        for line in content.lines() {
            if line == ANNOUNCE_IP_PLACEHOLDER {
                out.push(&announce);
            } else {
                out.push(line);
            }
        }
        Ok(format!("{}\n", out.join("\n")))
    }
}

/// Uncomments `requirepass` and `masterauth` once the cluster is formed.
struct EnableAuth;

impl ConfigMutation for EnableAuth {
    fn name(&self) -> &str {
        "enable redis auth"
    }

    fn needs_apply(&self, content: &str, _member: &ServiceMember) -> bool {
        content.lines().any(|l| l.starts_with("# requirepass "))
    }

    fn apply(&self, content: &str, _member: &ServiceMember) -> CatalogResult<String> {
        let out: Vec<&str> = content
            .lines()
            .map(|l| {
                if l.starts_with("# requirepass ") || l.starts_with("# masterauth ") {
                    &l[2..]
                } else {
                    l
                }
            })
            .collect();
        Ok(format!("{}\n", out.join("\n")))
    }
}

#[derive(Debug, Default)]
pub struct RedisCatalog;

impl RedisCatalog {
    fn user_attr(&self, user_attr: &[u8]) -> CatalogResult<RedisUserAttr> {
        decode_user_attr(REDIS_SERVICE_TYPE, user_attr)
    }
}

impl CatalogModule for RedisCatalog {
    fn service_type(&self) -> &'static str {
        REDIS_SERVICE_TYPE
    }

    fn validate_create(&self, options: &Value) -> CatalogResult<()> {
        parse_options::<RedisOptions>(options)?.validate()
    }

    fn generate_create_plan(&self, ctx: &CreateContext<'_>) -> CatalogResult<ServiceCreationPlan> {
        let opts: RedisOptions = parse_options(ctx.options)?;
        opts.validate()?;
        let max_mem = ctx.resource.max_mem_mb;
        if max_mem != -1 && max_mem < opts.memory_cache_size_mb {
            return Err(invalid(format!(
                "memory cache size {}MB exceeds the max memory {max_mem}MB",
                opts.memory_cache_size_mb
            )));
        }

        let identity = ctx.identity;
        let ua = RedisUserAttr::from(&opts);
        let cluster_mode = ua.is_cluster_mode();

        let mut replica_configs = Vec::new();
        for shard in 0..opts.shards {
            let master = member_dns_name(
                &member_name(&identity.service_name, shard, 0),
                &identity.domain_name,
            );
            for replica in 0..opts.replicas_per_shard {
                let name = member_name(&identity.service_name, shard, replica);
                // In cluster mode the init task assigns slaves.
                let slave_of = (!cluster_mode && replica > 0).then_some(master.as_str());
                replica_configs.push(ReplicaConfig {
                    zone: identity.zone_for((shard + replica) as usize),
                    configs: vec![
                        ReplicaConfigFile {
                            file_name: REDIS_CONF_FILE.to_string(),
                            file_mode: DEFAULT_FILE_MODE,
                            content: render_redis_conf(&ua, slave_of),
                        },
                        ReplicaConfigFile {
                            file_name: MEMBER_CONF_FILE.to_string(),
                            file_mode: DEFAULT_FILE_MODE,
                            content: render_member_conf(&name, shard, replica),
                        },
                    ],
                    member_name: name,
                });
            }
        }

        let mut envs = identity.base_envs();
        envs.push(EnvKeyValuePair::new(ENV_SHARDS, opts.shards.to_string()));
        envs.push(EnvKeyValuePair::new(
            ENV_REPLICAS_PER_SHARD,
            opts.replicas_per_shard.to_string(),
        ));

        let mut port_mappings = vec![PortMapping {
            container_port: LISTEN_PORT,
            host_port: LISTEN_PORT,
        }];

        let init_task = if cluster_mode {
            port_mappings.push(PortMapping {
                container_port: CLUSTER_BUS_PORT,
                host_port: CLUSTER_BUS_PORT,
            });
            let members: Vec<String> = replica_configs
                .iter()
                .map(|r| member_dns_name(&r.member_name, &identity.domain_name))
                .collect();
            let mut task_envs = envs.clone();
            task_envs.push(EnvKeyValuePair::new(ENV_MANAGE_URL, &identity.manage_url));
            task_envs.push(EnvKeyValuePair::new(ENV_SERVICE_MEMBERS, members.join(",")));
            task_envs.push(EnvKeyValuePair::new(ENV_REDIS_AUTH, &opts.auth_pass));
            Some(InitTaskSpec {
                task_type: INIT_TASK_TYPE.to_string(),
                container_image: format!("{CONTAINER_IMAGE_PREFIX}redis-init:{VERSION}"),
                envs: task_envs,
            })
        } else {
            None
        };

        debug!(
            service = %identity.service_name,
            shards = opts.shards,
            replicas_per_shard = opts.replicas_per_shard,
            cluster_mode,
            "generated redis creation plan"
        );

        Ok(ServiceCreationPlan {
            container_image: format!("{CONTAINER_IMAGE_PREFIX}redis:{VERSION}"),
            resource: ctx.resource,
            replicas: opts.shards * opts.replicas_per_shard,
            port_mappings,
            envs,
            register_dns: true,
            require_static_ip: cluster_mode,
            volumes: ServiceVolumes {
                primary: VolumeSpec {
                    volume_type: "gp2".to_string(),
                    size_gb: opts.volume_size_gb,
                    iops: 0,
                    encrypted: false,
                },
                ..ServiceVolumes::default()
            },
            replica_configs,
            user_attr: encode_user_attr(REDIS_SERVICE_TYPE, &ua)?,
            init_task,
        })
    }

    fn validate_update(&self, options: &Value) -> CatalogResult<()> {
        parse_options::<RedisUpdateOptions>(options)?.validate()
    }

    fn is_config_changed(&self, user_attr: &[u8], options: &Value) -> CatalogResult<bool> {
        let opts: RedisUpdateOptions = parse_options(options)?;
        Ok(opts.is_changed(&self.user_attr(user_attr)?))
    }

    fn update_config_content(
        &self,
        old_content: &str,
        user_attr: &[u8],
        options: &Value,
    ) -> CatalogResult<String> {
        let opts: RedisUpdateOptions = parse_options(options)?;
        let ua = self.user_attr(user_attr)?;
        let mut content = old_content.to_string();

        if let Some(mb) = opts.memory_cache_size_mb.filter(|v| *v != ua.memory_cache_size_mb) {
            content = replace_directive(&content, "maxmemory", Some(&format!("{mb}mb")));
        }
        if let Some(policy) = opts
            .max_memory_policy
            .as_ref()
            .filter(|v| **v != ua.max_memory_policy)
        {
            content = replace_directive(&content, "maxmemory-policy", Some(policy));
        }
        if let Some(secs) = opts.repl_timeout_secs.filter(|v| *v != ua.repl_timeout_secs) {
            content = replace_directive(&content, "repl-timeout", Some(&secs.to_string()));
        }
        if let Some(name) = opts
            .config_cmd_name
            .as_ref()
            .filter(|v| **v != ua.config_cmd_name)
        {
            content = replace_directive(&content, "rename-command", rename_config_value(name).as_deref());
        }
        if let Some(pass) = opts.auth_pass.as_ref().filter(|v| **v != ua.auth_pass) {
            let value = (!pass.is_empty()).then_some(pass.as_str());
            content = replace_directive(&content, "requirepass", value);
            content = replace_directive(&content, "masterauth", value);
        }
        Ok(content)
    }

    fn update_user_attr(&self, user_attr: &[u8], options: &Value) -> CatalogResult<Vec<u8>> {
        let opts: RedisUpdateOptions = parse_options(options)?;
        let merged = opts.merge(&self.user_attr(user_attr)?);
        encode_user_attr(REDIS_SERVICE_TYPE, &merged)
    }

    fn is_primary_config(&self, file_name: &str) -> bool {
        is_redis_conf(file_name)
    }

    fn pre_create_mutations(&self, user_attr: &[u8]) -> CatalogResult<Vec<Box<dyn ConfigMutation>>> {
        if self.user_attr(user_attr)?.is_cluster_mode() {
            return Ok(vec![Box::new(SetClusterAnnounceIp)]);
        }
        Ok(Vec::new())
    }

    fn init_mutations(&self, user_attr: &[u8]) -> CatalogResult<Vec<Box<dyn ConfigMutation>>> {
        if self.user_attr(user_attr)?.is_cluster_mode() {
            return Ok(vec![Box::new(EnableAuth)]);
        }
        Ok(Vec::new())
    }

    fn monitor_envs(&self, user_attr: &[u8]) -> CatalogResult<Vec<EnvKeyValuePair>> {
        let ua = self.user_attr(user_attr)?;
        Ok(vec![EnvKeyValuePair::new(ENV_REDIS_AUTH, ua.auth_pass)])
    }

    fn public_user_attr(&self, user_attr: &[u8]) -> CatalogResult<Value> {
        let mut ua = self.user_attr(user_attr)?;
        if !ua.auth_pass.is_empty() {
            ua.auth_pass = REDACTED.to_string();
        }
        serde_json::to_value(&ua).map_err(|e| CatalogError::CorruptUserAttr {
            service_type: REDIS_SERVICE_TYPE.to_string(),
            reason: e.to_string(),
        })
    }
}
