//! tidepool-state: metadata model and store contract.
//!
//! Records describe services, their members and per-member config files,
//! static IPs and devices. [`MetadataStore`] is the store contract consumed by
//! the manage server; [`StateStore`] implements it on
//! [redb](https://docs.rs/redb) with JSON-encoded values.
//!
//! `StateStore` is `Clone + Send + Sync` (backed by `Arc<Database>`) and can
//! be shared across request tasks.

pub mod compare;
pub mod db;
pub mod error;
pub mod recording;
pub mod store;
pub mod tables;
pub mod types;

pub use compare::{CompareOptions, equal_attr, equal_config_file, equal_member};
pub use db::MetadataStore;
pub use error::{StateError, StateResult};
pub use recording::{RecordingStore, StoreOp};
pub use store::StateStore;
pub use types::*;
