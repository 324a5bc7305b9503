//! Manage server errors and their client-facing classification.

use thiserror::Error;
use tidepool_catalog::CatalogError;
use tidepool_platform::PlatformError;
use tidepool_state::StateError;

use crate::waiter::WaitError;

pub type ManageResult<T> = Result<T, ManageError>;

/// How a failure is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request, never worth retrying.
    Validation,
    NotFound,
    Conflict,
    /// A backing system was unreachable. The request may be retried.
    Transient,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Transient => 503,
            ErrorKind::Internal => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum ManageError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("service {0} not found")]
    ServiceNotFound(String),

    #[error("service {0} already exists")]
    ServiceExists(String),

    #[error("init task already exists for service {0}")]
    InitInProgress(String),

    #[error("primary config file not found for member {0}")]
    ConfigNotFound(String),

    #[error("member {member}: {source}")]
    Member {
        member: String,
        #[source]
        source: Box<ManageError>,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl ManageError {
    /// Attach the name of the member whose update failed.
    pub fn for_member(member: &str, err: impl Into<ManageError>) -> Self {
        ManageError::Member {
            member: member.to_string(),
            source: Box::new(err.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ManageError::InvalidRequest(_) => ErrorKind::Validation,
            ManageError::ServiceNotFound(_) | ManageError::ConfigNotFound(_) => ErrorKind::NotFound,
            ManageError::ServiceExists(_) | ManageError::InitInProgress(_) => ErrorKind::Conflict,
            ManageError::Member { source, .. } => source.kind(),
            ManageError::State(e) => match e {
                StateError::NotFound(_) => ErrorKind::NotFound,
                StateError::RecordExists(_) | StateError::Conflict(_) => ErrorKind::Conflict,
                StateError::Serialize(_)
                | StateError::Deserialize(_)
                | StateError::InvalidRecord(_) => ErrorKind::Internal,
                StateError::Open(_)
                | StateError::Transaction(_)
                | StateError::Table(_)
                | StateError::Read(_)
                | StateError::Write(_) => ErrorKind::Transient,
            },
            ManageError::Platform(e) => match e {
                PlatformError::ServiceNotFound(_) | PlatformError::TaskNotFound(_) => {
                    ErrorKind::NotFound
                }
                PlatformError::ServiceExists(_) => ErrorKind::Conflict,
                PlatformError::InvalidRequest(_) => ErrorKind::Validation,
                PlatformError::NoCapacity(_) | PlatformError::Unavailable(_) => {
                    ErrorKind::Transient
                }
            },
            ManageError::Catalog(e) => match e {
                CatalogError::InvalidOptions(_) => ErrorKind::Validation,
                CatalogError::UnknownServiceType(_) => ErrorKind::NotFound,
                CatalogError::CorruptUserAttr { .. } | CatalogError::Mutation { .. } => {
                    ErrorKind::Internal
                }
            },
            ManageError::Wait(_) => ErrorKind::Transient,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}
