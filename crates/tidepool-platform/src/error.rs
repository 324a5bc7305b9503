use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("service {0} not found")]
    ServiceNotFound(String),

    #[error("service {0} already exists")]
    ServiceExists(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no static ip available in zone {0}")]
    NoCapacity(String),

    /// The platform could not be reached or refused the call. Safe to retry.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Unavailable(_))
    }
}
