use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// Condition type kcp sets once the virtual workspace URLs are published
pub const VIRTUAL_WORKSPACE_URLS_READY: &str = "VirtualWorkspaceURLsReady";

/// APIExport publishes a set of APIs so that other workspaces can bind them
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "apis.kcp.io",
    version = "v1alpha1",
    kind = "APIExport",
    plural = "apiexports",
    derive = "Default",
    status = "APIExportStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct APIExportSpec {
    /// Names of the APIResourceSchemas exported
    #[serde(default)]
    pub latest_resource_schemas: Vec<String>,
}

/// Status of an APIExport
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct APIExportStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Endpoints of the virtual workspace serving this export
    #[serde(default)]
    pub virtual_workspaces: Vec<VirtualWorkspace>,
}

/// A virtual workspace endpoint
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VirtualWorkspace {
    pub url: String,
}

impl APIExportStatus {
    /// An export is ready once its URLs condition is true and at least one
    /// virtual workspace URL has been published.
    pub fn is_ready(&self) -> bool {
        !self.virtual_workspaces.is_empty()
            && self
                .conditions
                .iter()
                .any(|c| c.is_true(VIRTUAL_WORKSPACE_URLS_READY))
    }

    /// The first published virtual workspace URL
    pub fn first_url(&self) -> Option<&str> {
        self.virtual_workspaces.first().map(|vw| vw.url.as_str())
    }
}

impl APIExport {
    /// Returns the first virtual workspace URL when the export is ready
    pub fn ready_url(&self) -> Option<&str> {
        self.status
            .as_ref()
            .filter(|status| status.is_ready())
            .and_then(|status| status.first_url())
    }
}
