//! tidepool-platform: the container orchestrator seen by the manage server.
//!
//! [`ContainerPlatform`] covers the service and task operations the lifecycle
//! needs; [`NetworkAllocator`] hands out static IPs. Concrete SDK bindings live
//! outside this workspace. [`MemoryPlatform`] and [`MemoryNetwork`] run
//! entirely in process.

pub mod error;
pub mod memory;
pub mod platform;
pub mod types;

pub use error::{PlatformError, PlatformResult};
pub use memory::{MemoryNetwork, MemoryPlatform, PlatformCall};
pub use platform::{ContainerPlatform, NetworkAllocator};
pub use types::*;
