//! Mapping of manage errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tidepool_manage::{ErrorKind, ManageError};
use tracing::{error, warn};

#[derive(Debug)]
pub enum ApiError {
    /// The request body could not be decoded.
    BadBody(String),
    Internal(String),
    Manage(ManageError),
}

impl From<ManageError> for ApiError {
    fn from(e: ManageError) -> Self {
        ApiError::Manage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadBody(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::Manage(e) => {
                let status = StatusCode::from_u16(e.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                match e.kind() {
                    ErrorKind::Transient | ErrorKind::Internal => error!(error = %e, "request failed"),
                    _ => warn!(error = %e, "request rejected"),
                }
                (status, e.to_string())
            }
        };
        (status, [("content-type", "text/plain; charset=utf-8")], msg).into_response()
    }
}
