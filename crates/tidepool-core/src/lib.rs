pub mod config;
pub mod types;

pub use config::{ConfigError, ManageConfig, TlsFiles, WaitConfig};
pub use types::*;
