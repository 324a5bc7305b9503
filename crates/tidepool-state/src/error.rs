//! Error types for the metadata store.

use thiserror::Error;

/// Result type alias for metadata store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// The record breaks an invariant of its table, e.g. a stale md5.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    RecordExists(String),

    /// The stored value no longer matches the caller's expected old value.
    #[error("conditional update failed: {0}")]
    Conflict(String),
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }

    pub fn is_record_exists(&self) -> bool {
        matches!(self, StateError::RecordExists(_))
    }
}
