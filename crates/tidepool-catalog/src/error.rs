use thiserror::Error;

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The request options are malformed or out of range.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("unknown service type: {0}")]
    UnknownServiceType(String),

    #[error("corrupt {service_type} user attributes: {reason}")]
    CorruptUserAttr { service_type: String, reason: String },

    /// A config mutation cannot be applied to a member.
    #[error("cannot update {member}: {reason}")]
    Mutation { member: String, reason: String },
}
