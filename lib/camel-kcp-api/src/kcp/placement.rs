use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Placement selects the locations workloads of a workspace are scheduled to
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "scheduling.kcp.io",
    version = "v1alpha1",
    kind = "Placement",
    plural = "placements",
    derive = "Default",
    status = "PlacementStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSpec {
    /// Workspace the locations are selected from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_workspace: Option<String>,

    /// Resource type backing the selected locations
    #[serde(default)]
    pub location_resource: GroupVersionResource,

    /// Selectors for candidate locations
    #[serde(default)]
    pub location_selectors: Vec<LabelSelector>,

    /// Selector for the namespaces bound by this placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
}

/// Status of a Placement
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacementStatus {
    /// Pending, Bound or Unbound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}
