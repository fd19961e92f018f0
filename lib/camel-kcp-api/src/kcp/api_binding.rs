use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Condition;

/// APIBinding binds an APIExport into a consumer workspace
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "apis.kcp.io",
    version = "v1alpha1",
    kind = "APIBinding",
    plural = "apibindings",
    derive = "Default",
    status = "APIBindingStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct APIBindingSpec {
    /// Reference to the bound export
    #[serde(default)]
    pub reference: BindingReference,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BindingReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportBindingReference>,
}

/// Reference to an APIExport by workspace path and name
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExportBindingReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub name: String,
}

/// Status of an APIBinding
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct APIBindingStatus {
    /// Lifecycle phase as reported by kcp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Lifecycle phase of an APIBinding
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingPhase {
    /// The binding is being set up
    Binding,
    /// The bound APIs are usable
    Bound,
    /// Empty or unrecognised phase
    Unknown(String),
}

impl From<&str> for BindingPhase {
    fn from(phase: &str) -> Self {
        match phase {
            "Binding" => BindingPhase::Binding,
            "Bound" => BindingPhase::Bound,
            other => BindingPhase::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for BindingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingPhase::Binding => write!(f, "Binding"),
            BindingPhase::Bound => write!(f, "Bound"),
            BindingPhase::Unknown(phase) => write!(f, "{}", phase),
        }
    }
}

impl APIBinding {
    /// Current phase, `Unknown("")` until kcp has reported one
    pub fn phase(&self) -> BindingPhase {
        self.status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            .map(BindingPhase::from)
            .unwrap_or_else(|| BindingPhase::Unknown(String::new()))
    }

    /// Whether the binding carries a deletion timestamp
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
