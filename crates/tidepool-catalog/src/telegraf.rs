//! Telegraf catalog module: a single stateless agent that monitors another
//! service.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidepool_core::{CONTAINER_IMAGE_PREFIX, EnvKeyValuePair, member_dns_name};
use tidepool_state::{DEFAULT_FILE_MODE, ServiceVolumes};

use crate::error::{CatalogError, CatalogResult};
use crate::module::*;

pub const TELEGRAF_SERVICE_TYPE: &str = "telegraf";
pub const TELEGRAF_CONF_FILE: &str = "telegraf.conf";

pub const ENV_COLLECT_INTERVAL: &str = "COLLECT_INTERVAL";
pub const ENV_MONITOR_SERVICE_NAME: &str = "MONITOR_SERVICE_NAME";
pub const ENV_MONITOR_SERVICE_TYPE: &str = "MONITOR_SERVICE_TYPE";
pub const ENV_MONITOR_SERVICE_MEMBERS: &str = "MONITOR_SERVICE_MEMBERS";
pub const ENV_MONITOR_METRICS: &str = "MONITOR_METRICS";

const VERSION: &str = "1.5";
const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 60;
/// Custom metrics are passed through an env var, so keep them small.
const MAX_METRICS_LEN: usize = 16 * 1024;

fn default_collect_interval() -> u64 {
    DEFAULT_COLLECT_INTERVAL_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegrafOptions {
    #[serde(default = "default_collect_interval")]
    pub collect_interval_secs: u64,
    pub monitor_service_name: String,
    #[serde(default)]
    pub monitor_metrics: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegrafUpdateOptions {
    pub collect_interval_secs: Option<u64>,
    pub monitor_metrics: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegrafUserAttr {
    pub collect_interval_secs: u64,
    pub monitor_service_name: String,
    pub monitor_metrics: String,
}

fn check_interval(secs: u64) -> CatalogResult<()> {
    if secs == 0 {
        return Err(CatalogError::InvalidOptions(
            "collect interval must be positive".to_string(),
        ));
    }
    Ok(())
}

fn check_metrics(metrics: &str) -> CatalogResult<()> {
    if metrics.len() > MAX_METRICS_LEN {
        return Err(CatalogError::InvalidOptions(format!(
            "custom metrics must be within {MAX_METRICS_LEN} bytes"
        )));
    }
    Ok(())
}

impl TelegrafOptions {
    pub fn validate(&self) -> CatalogResult<()> {
        check_interval(self.collect_interval_secs)?;
        if self.monitor_service_name.is_empty() {
            return Err(CatalogError::InvalidOptions(
                "monitor service name is required".to_string(),
            ));
        }
        check_metrics(&self.monitor_metrics)
    }
}

impl TelegrafUpdateOptions {
    pub fn validate(&self) -> CatalogResult<()> {
        if let Some(secs) = self.collect_interval_secs {
            check_interval(secs)?;
        }
        if let Some(metrics) = &self.monitor_metrics {
            check_metrics(metrics)?;
        }
        Ok(())
    }

    fn merge(&self, ua: &TelegrafUserAttr) -> TelegrafUserAttr {
        TelegrafUserAttr {
            collect_interval_secs: self.collect_interval_secs.unwrap_or(ua.collect_interval_secs),
            monitor_service_name: ua.monitor_service_name.clone(),
            monitor_metrics: self
                .monitor_metrics
                .clone()
                .unwrap_or_else(|| ua.monitor_metrics.clone()),
        }
    }
}

fn render_conf(ua: &TelegrafUserAttr) -> String {
    let mut conf = format!(
        "[agent]\n  interval = \"{secs}s\"\n  flush_interval = \"{secs}s\"\n  omit_hostname = false\n\n# monitored service: {name}\n",
        secs = ua.collect_interval_secs,
        name = ua.monitor_service_name,
    );
    if !ua.monitor_metrics.is_empty() {
        conf.push_str("\n# custom metrics\n");
        conf.push_str(&ua.monitor_metrics);
        if !ua.monitor_metrics.ends_with('\n') {
            conf.push('\n');
        }
    }
    conf
}

#[derive(Debug, Default)]
pub struct TelegrafCatalog;

impl TelegrafCatalog {
    fn user_attr(&self, user_attr: &[u8]) -> CatalogResult<TelegrafUserAttr> {
        decode_user_attr(TELEGRAF_SERVICE_TYPE, user_attr)
    }
}

impl CatalogModule for TelegrafCatalog {
    fn service_type(&self) -> &'static str {
        TELEGRAF_SERVICE_TYPE
    }

    fn validate_create(&self, options: &Value) -> CatalogResult<()> {
        parse_options::<TelegrafOptions>(options)?.validate()
    }

    fn monitored_service(&self, options: &Value) -> CatalogResult<Option<String>> {
        let opts: TelegrafOptions = parse_options(options)?;
        Ok(Some(opts.monitor_service_name))
    }

    fn generate_create_plan(&self, ctx: &CreateContext<'_>) -> CatalogResult<ServiceCreationPlan> {
        let opts: TelegrafOptions = parse_options(ctx.options)?;
        opts.validate()?;
        let monitored = ctx.monitored.as_ref().ok_or_else(|| {
            CatalogError::InvalidOptions(format!(
                "monitored service {} is not available",
                opts.monitor_service_name
            ))
        })?;

        let members: Vec<String> = monitored
            .members
            .iter()
            .map(|m| member_dns_name(&m.member_name, &monitored.attr.domain_name))
            .collect();

        let identity = ctx.identity;
        let mut envs = identity.base_envs();
        envs.push(EnvKeyValuePair::new(
            ENV_COLLECT_INTERVAL,
            format!("{}s", opts.collect_interval_secs),
        ));
        envs.push(EnvKeyValuePair::new(ENV_MONITOR_SERVICE_NAME, &opts.monitor_service_name));
        envs.push(EnvKeyValuePair::new(
            ENV_MONITOR_SERVICE_TYPE,
            &monitored.attr.service_type,
        ));
        envs.push(EnvKeyValuePair::new(ENV_MONITOR_SERVICE_MEMBERS, members.join(",")));
        envs.push(EnvKeyValuePair::new(ENV_MONITOR_METRICS, &opts.monitor_metrics));
        envs.extend(monitored.envs.iter().cloned());

        let ua = TelegrafUserAttr {
            collect_interval_secs: opts.collect_interval_secs,
            monitor_service_name: opts.monitor_service_name.clone(),
            monitor_metrics: opts.monitor_metrics.clone(),
        };

        Ok(ServiceCreationPlan {
            container_image: format!("{CONTAINER_IMAGE_PREFIX}telegraf:{VERSION}"),
            resource: ctx.resource,
            replicas: 1,
            port_mappings: Vec::new(),
            envs,
            register_dns: false,
            require_static_ip: false,
            volumes: ServiceVolumes::default(),
            replica_configs: vec![ReplicaConfig {
                member_name: format!("{}-0", identity.service_name),
                zone: identity.zone_for(0),
                configs: vec![ReplicaConfigFile {
                    file_name: TELEGRAF_CONF_FILE.to_string(),
                    file_mode: DEFAULT_FILE_MODE,
                    content: render_conf(&ua),
                }],
            }],
            user_attr: encode_user_attr(TELEGRAF_SERVICE_TYPE, &ua)?,
            init_task: None,
        })
    }

    fn validate_update(&self, options: &Value) -> CatalogResult<()> {
        parse_options::<TelegrafUpdateOptions>(options)?.validate()
    }

    fn is_config_changed(&self, user_attr: &[u8], options: &Value) -> CatalogResult<bool> {
        let opts: TelegrafUpdateOptions = parse_options(options)?;
        let ua = self.user_attr(user_attr)?;
        Ok(opts.merge(&ua) != ua)
    }

    fn update_config_content(
        &self,
        _old_content: &str,
        user_attr: &[u8],
        options: &Value,
    ) -> CatalogResult<String> {
        let opts: TelegrafUpdateOptions = parse_options(options)?;
        Ok(render_conf(&opts.merge(&self.user_attr(user_attr)?)))
    }

    fn update_user_attr(&self, user_attr: &[u8], options: &Value) -> CatalogResult<Vec<u8>> {
        let opts: TelegrafUpdateOptions = parse_options(options)?;
        encode_user_attr(TELEGRAF_SERVICE_TYPE, &opts.merge(&self.user_attr(user_attr)?))
    }

    fn is_primary_config(&self, file_name: &str) -> bool {
        file_name == TELEGRAF_CONF_FILE
    }
}
