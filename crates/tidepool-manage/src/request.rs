//! Request bodies accepted by the manage server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidepool_core::Resources;

use crate::error::{ManageError, ManageResult};

/// Identifies the service a request targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCommonRequest {
    pub region: String,
    pub cluster: String,
    pub service_name: String,
}

impl ServiceCommonRequest {
    /// Reject requests aimed at another cluster or carrying a malformed name.
    pub fn validate(&self, region: &str, cluster: &str) -> ManageResult<()> {
        validate_target(&self.region, &self.cluster, &self.service_name, region, cluster)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub service: ServiceCommonRequest,
    #[serde(default)]
    pub resource: Resources,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub service: ServiceCommonRequest,
    #[serde(default)]
    pub options: Value,
}

/// Sent by an init task once it has configured the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetInitRequest {
    pub region: String,
    pub cluster: String,
    pub service_name: String,
}

impl SetInitRequest {
    pub fn validate(&self, region: &str, cluster: &str) -> ManageResult<()> {
        validate_target(&self.region, &self.cluster, &self.service_name, region, cluster)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInitStatus {
    pub initialized: bool,
    pub status_message: String,
}

fn validate_target(
    req_region: &str,
    req_cluster: &str,
    service_name: &str,
    region: &str,
    cluster: &str,
) -> ManageResult<()> {
    if req_region != region {
        return Err(ManageError::InvalidRequest(format!(
            "region {req_region} is not managed here ({region})"
        )));
    }
    if req_cluster != cluster {
        return Err(ManageError::InvalidRequest(format!(
            "cluster {req_cluster} is not managed here ({cluster})"
        )));
    }
    validate_service_name(service_name)
}

/// Service names become DNS labels, so only lower case letters, digits and
/// `-` are allowed.
pub fn validate_service_name(name: &str) -> ManageResult<()> {
    if name.is_empty() {
        return Err(ManageError::InvalidRequest("service name is empty".into()));
    }
    if name.len() > 63 {
        return Err(ManageError::InvalidRequest(format!(
            "service name {name} is longer than 63 characters"
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid || name.starts_with('-') || name.ends_with('-') {
        return Err(ManageError::InvalidRequest(format!(
            "invalid service name {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(name: &str) -> ServiceCommonRequest {
        ServiceCommonRequest {
            region: "us-east-1".into(),
            cluster: "c1".into(),
            service_name: name.into(),
        }
    }

    #[test]
    fn accepts_matching_target() {
        assert!(common("redis1").validate("us-east-1", "c1").is_ok());
    }

    #[test]
    fn rejects_foreign_cluster() {
        let err = common("redis1").validate("us-east-1", "other").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn rejects_bad_names() {
        for name in ["", "Redis", "redis_1", "-redis", "redis.1"] {
            assert!(validate_service_name(name).is_err(), "{name}");
        }
        assert!(validate_service_name("redis-1").is_ok());
    }

    #[test]
    fn create_request_defaults_resource() {
        let req: CreateRequest = serde_json::from_str(
            r#"{"service":{"region":"r","cluster":"c","service_name":"s"},"options":{"shards":1}}"#,
        )
        .unwrap();
        assert_eq!(req.resource, Resources::default());
        assert_eq!(req.options["shards"], 1);
    }
}
