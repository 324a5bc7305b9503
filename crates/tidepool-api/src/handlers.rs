//! Request handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tidepool_manage::{CreateRequest, ServiceInitStatus, SetInitRequest, UpdateRequest};

use crate::ApiState;
use crate::error::ApiError;

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadBody(format!("invalid request body: {e}")))
}

/// POST /v1/catalog/{service_type}
pub async fn create_service(
    State(state): State<ApiState>,
    Path(service_type): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let req: CreateRequest = decode(&body)?;
    state.lifecycle.create_service(&service_type, req).await?;
    Ok(StatusCode::OK)
}

/// PUT /v1/catalog/{service_type}
pub async fn update_service(
    State(state): State<ApiState>,
    Path(service_type): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let req: UpdateRequest = decode(&body)?;
    state.lifecycle.update_service(&service_type, req).await?;
    Ok(StatusCode::OK)
}

/// POST /v1/catalog/init
pub async fn set_service_init(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let req: SetInitRequest = decode(&body)?;
    state.lifecycle.set_service_init(req).await?;
    Ok(StatusCode::OK)
}

/// GET /v1/catalog/init/{service_name}
pub async fn check_service_init(
    State(state): State<ApiState>,
    Path(service_name): Path<String>,
) -> Result<Json<ServiceInitStatus>, ApiError> {
    Ok(Json(state.lifecycle.check_service_init(&service_name).await?))
}

/// GET /v1/services/{service_name}
///
/// The module's user attributes are returned decoded, with credentials masked.
pub async fn get_service_attr(
    State(state): State<ApiState>,
    Path(service_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (attr, user_attr) = state.lifecycle.describe_service(&service_name).await?;
    let mut value = serde_json::to_value(&attr).map_err(|e| ApiError::Internal(e.to_string()))?;
    value["user_attr"] = user_attr;
    Ok(Json(value))
}
