use crate::provider::{ProviderError, ProviderResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A deployment variable as Bitbucket sends and accepts it.
///
/// Missing fields decode to their defaults; Bitbucket leaves `value` out of
/// responses for secured variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentVariable {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default)]
    pub secured: bool,
}

impl DeploymentVariable {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            uuid: String::new(),
            secured: false,
        }
    }

    pub fn with_secured(mut self, secured: bool) -> Self {
        self.secured = secured;
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }
}

/// One page of the variables collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginatedDeploymentVariables {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<DeploymentVariable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Repository and deployment environment addressed by a composite
/// `<repository>:<deployment>` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentTarget {
    pub repository: String,
    pub deployment: String,
}

impl DeploymentTarget {
    pub fn new(repository: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            deployment: deployment.into(),
        }
    }

    /// Split on the first colon only, so `"a:b:c"` gives `("a", "b:c")`.
    pub fn parse(id: &str) -> ProviderResult<Self> {
        match id.split_once(':') {
            Some((repository, deployment)) if !repository.is_empty() && !deployment.is_empty() => {
                Ok(Self::new(repository, deployment))
            }
            _ => Err(ProviderError::InvalidDeploymentId { id: id.to_string() }),
        }
    }

    pub fn variables_path(&self) -> String {
        format!(
            "2.0/repositories/{}/deployments_config/environments/{}/variables",
            self.repository, self.deployment
        )
    }

    pub fn variable_path(&self, uuid: &str) -> String {
        format!("{}/{}", self.variables_path(), uuid)
    }
}

impl FromStr for DeploymentTarget {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_splits_on_first_colon() {
        let target = DeploymentTarget::parse("a:b:c").unwrap();
        assert_eq!(target, DeploymentTarget::new("a", "b:c"));

        let target: DeploymentTarget = "acme/api:{7a9e-env}".parse().unwrap();
        assert_eq!(target.repository, "acme/api");
        assert_eq!(target.deployment, "{7a9e-env}");
        assert_eq!(target.to_string(), "acme/api:{7a9e-env}");
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        for id in ["", "no-colon", ":deployment", "repository:"] {
            assert!(
                matches!(
                    DeploymentTarget::parse(id),
                    Err(ProviderError::InvalidDeploymentId { .. })
                ),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_paths() {
        let target = DeploymentTarget::new("acme/api", "{env}");
        assert_eq!(
            target.variables_path(),
            "2.0/repositories/acme/api/deployments_config/environments/{env}/variables"
        );
        assert_eq!(
            target.variable_path("{var}"),
            "2.0/repositories/acme/api/deployments_config/environments/{env}/variables/{var}"
        );
    }

    #[test]
    fn test_request_body_omits_empty_uuid() {
        let body = serde_json::to_value(DeploymentVariable::new("KEY", "v")).unwrap();
        assert_eq!(body, json!({"key": "KEY", "value": "v", "secured": false}));

        let body = serde_json::to_value(DeploymentVariable::new("KEY", "v").with_uuid("{u}"))
            .unwrap();
        assert_eq!(body["uuid"], "{u}");
    }

    #[test]
    fn test_decode_secured_variable_without_value() {
        let variable: DeploymentVariable = serde_json::from_value(json!({
            "type": "pipeline_variable",
            "uuid": "{u1}",
            "key": "TOKEN",
            "secured": true
        }))
        .unwrap();

        assert_eq!(variable.key, "TOKEN");
        assert_eq!(variable.value, "");
        assert!(variable.secured);
    }

    #[test]
    fn test_decode_listing_envelope() {
        let page: PaginatedDeploymentVariables = serde_json::from_value(json!({
            "pagelen": 10,
            "page": 1,
            "size": 1,
            "values": [{"uuid": "{u1}", "key": "K", "value": "V", "secured": false}]
        }))
        .unwrap();

        assert_eq!(page.size, 1);
        assert_eq!(page.page, Some(1));
        assert!(page.next.is_none());
        assert_eq!(page.values[0].uuid, "{u1}");

        let empty: PaginatedDeploymentVariables = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.size, 0);
        assert!(empty.values.is_empty());
    }
}
