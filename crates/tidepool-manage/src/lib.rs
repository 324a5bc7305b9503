//! tidepool-manage: the manage server's service lifecycle.
//!
//! [`ServiceLifecycle`] owns the create, update and init flows. Config
//! changes go through the [`ConfigUpdateEngine`], one member at a time.
//! Services that need a post-start init task are tracked by the
//! [`InitTaskTracker`] and finished by the [`InitPhase`].

pub mod config_update;
pub mod error;
pub mod init_phase;
pub mod init_task;
pub mod lifecycle;
pub mod request;
pub mod waiter;

pub use config_update::{ConfigUpdateEngine, MemberUpdateReport, UpdateRewrite};
pub use error::{ErrorKind, ManageError, ManageResult};
pub use init_phase::{InitPhase, RESTART_STATUS_MSG};
pub use init_task::{InitTask, InitTaskStatus, InitTaskTracker, TaskOutcome, TaskPhase};
pub use lifecycle::{ManageContext, ServiceLifecycle};
pub use request::{
    CreateRequest, ServiceCommonRequest, ServiceInitStatus, SetInitRequest, UpdateRequest,
};
pub use waiter::{Readiness, ReadinessWaiter, WaitError};
