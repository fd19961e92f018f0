//! Service configuration
//!
//! The configuration is a YAML document; every section is optional and
//! falls back to the defaults below.
//!
//! ```yaml
//! service:
//!   apiExports:
//!     camel-k:
//!       apiExportName: camel-k
//!       onApiBinding:
//!         createDefaultPlatform:
//!           spec:
//!             profile: Kubernetes
//!     kaoto:
//!       apiExportName: kaoto
//!   defaults:
//!     operatorNamespace: camel-k
//! controller:
//!   workers: 4
//! ```

use camel_kcp_api::camel::integration_platform::IntegrationPlatformSpec;
use camel_kcp_api::kcp::placement::PlacementSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfiguration {
    #[serde(default)]
    pub service: ServiceConfigurationSpec,

    #[serde(default)]
    pub controller: ControllerConfiguration,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfigurationSpec {
    #[serde(default)]
    pub api_exports: APIExports,

    #[serde(default)]
    pub defaults: PlatformDefaults,

    #[serde(default)]
    pub ingress_relay: IngressRelayConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct APIExports {
    /// The Camel K export, always served
    #[serde(rename = "camel-k", default)]
    pub camel_k: APIExportConfig,

    /// The Kaoto export, served only when configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kaoto: Option<APIExportConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct APIExportConfig {
    /// Name of the APIExport; empty means the only export visible
    #[serde(default)]
    pub api_export_name: String,

    /// Desired state of a consumer workspace once the export is bound
    #[serde(default)]
    pub on_api_binding: OnAPIBinding,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnAPIBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_default_platform: Option<PlatformTemplate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_default_placement: Option<PlacementTemplate>,
}

/// IntegrationPlatform created in bound workspaces; empty name and
/// namespace are filled from [`PlatformDefaults`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlatformTemplate {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: IntegrationPlatformSpec,
}

/// Placement created in bound workspaces
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlacementTemplate {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PlacementSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDefaults {
    /// Namespace of the operator, used for the default platform
    #[serde(default = "default_operator_namespace")]
    pub operator_namespace: String,

    #[serde(default = "default_platform_name")]
    pub platform_name: String,
}

impl Default for PlatformDefaults {
    fn default() -> Self {
        Self {
            operator_namespace: default_operator_namespace(),
            platform_name: default_platform_name(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRelayConfig {
    /// Namespace of the ingresses whose status is observed
    #[serde(default = "default_relay_source_namespace")]
    pub source_namespace: String,

    /// Namespace of the tenant-facing ingresses that get annotated
    #[serde(default = "default_relay_target_namespace")]
    pub target_namespace: String,

    #[serde(default = "default_relay_annotation")]
    pub annotation: String,

    #[serde(default = "default_relay_scheme")]
    pub scheme: String,
}

impl Default for IngressRelayConfig {
    fn default() -> Self {
        Self {
            source_namespace: default_relay_source_namespace(),
            target_namespace: default_relay_target_namespace(),
            annotation: default_relay_annotation(),
            scheme: default_relay_scheme(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfiguration {
    /// Concurrent reconciles per controller
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Delay before a binding whose APIs are not served yet is retried
    #[serde(default = "default_retry_after_seconds")]
    pub retry_after_seconds: u64,

    /// Delay before a failed reconcile is delivered again
    #[serde(default = "default_error_requeue_seconds")]
    pub error_requeue_seconds: u64,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for ControllerConfiguration {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_after_seconds: default_retry_after_seconds(),
            error_requeue_seconds: default_error_requeue_seconds(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl ControllerConfiguration {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_seconds)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_seconds)
    }
}

impl ServiceConfiguration {
    /// Parse and validate a configuration document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(kaoto) = &self.service.api_exports.kaoto {
            if kaoto.api_export_name.is_empty() {
                return Err(Error::Config(
                    "service.apiExports.kaoto.apiExportName must be set".to_string(),
                ));
            }
        }
        if self.service.defaults.operator_namespace.is_empty() {
            return Err(Error::Config(
                "service.defaults.operatorNamespace must not be empty".to_string(),
            ));
        }
        let relay = &self.service.ingress_relay;
        if relay.source_namespace == relay.target_namespace {
            return Err(Error::Config(format!(
                "ingress relay source and target namespaces must differ, both are {:?}",
                relay.source_namespace
            )));
        }
        if self.controller.workers == 0 {
            return Err(Error::Config("controller.workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn default_operator_namespace() -> String {
    "camel-k".to_string()
}

fn default_platform_name() -> String {
    "camel-k".to_string()
}

fn default_relay_source_namespace() -> String {
    "kaoto-ingress".to_string()
}

fn default_relay_target_namespace() -> String {
    "kaoto".to_string()
}

fn default_relay_annotation() -> String {
    "kaoto.io/ingress".to_string()
}

fn default_relay_scheme() -> String {
    "http".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_retry_after_seconds() -> u64 {
    5
}

fn default_error_requeue_seconds() -> u64 {
    60
}

fn default_metrics_port() -> u16 {
    8080
}
