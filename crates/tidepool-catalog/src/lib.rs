//! tidepool-catalog: per service type logic.
//!
//! A [`CatalogModule`] validates options, produces a [`ServiceCreationPlan`],
//! rewrites config content on update, and exposes idempotent
//! [`ConfigMutation`]s for the steps that run after members exist. Modules are
//! looked up through a [`CatalogRegistry`].

pub mod error;
pub mod module;
pub mod redis;
pub mod registry;
pub mod telegraf;

pub use error::{CatalogError, CatalogResult};
pub use module::{
    CatalogModule, ConfigMutation, CreateContext, InitTaskSpec, MonitoredService, ReplicaConfig,
    REDACTED, ReplicaConfigFile, ServiceCreationPlan, ServiceIdentity,
};
pub use redis::RedisCatalog;
pub use registry::CatalogRegistry;
pub use telegraf::TelegrafCatalog;
