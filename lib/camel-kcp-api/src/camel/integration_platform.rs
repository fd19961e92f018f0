use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// IntegrationPlatform configures how Camel K builds and runs integrations
/// in a namespace
///
/// The controllers never interpret the platform settings: they are copied
/// verbatim from the service configuration, so every field is preserved as
/// raw JSON.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "camel.apache.org",
    version = "v1",
    kind = "IntegrationPlatform",
    plural = "integrationplatforms",
    shortname = "ip",
    namespaced,
    derive = "Default",
    derive = "PartialEq",
    status = "IntegrationPlatformStatus",
)]
pub struct IntegrationPlatformSpec {
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Status of an IntegrationPlatform
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntegrationPlatformStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_is_kept_verbatim() {
        let spec: IntegrationPlatformSpec = serde_yaml::from_str(
            r#"
build:
  registry:
    address: registry.example.com
    insecure: true
profile: Kubernetes
"#,
        )
        .unwrap();

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["profile"], "Kubernetes");
        assert_eq!(value["build"]["registry"]["address"], "registry.example.com");
        assert_eq!(value["build"]["registry"]["insecure"], true);
    }
}
