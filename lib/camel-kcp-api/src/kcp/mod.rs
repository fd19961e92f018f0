//! Bindings to the kcp APIs used by camel-kcp
//!
//! Only the fields read or written by the controllers are modelled; unknown
//! fields are ignored on deserialization.

pub mod api_binding;
pub mod api_export;
pub mod placement;

pub use api_binding::{APIBinding, BindingPhase};
pub use api_export::APIExport;
pub use placement::Placement;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group for kcp API exports and bindings
pub const APIS_GROUP: &str = "apis.kcp.io";
/// API group for kcp scheduling resources
pub const SCHEDULING_GROUP: &str = "scheduling.kcp.io";

/// Condition as reported by kcp resources
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status: "True", "False" or "Unknown"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    /// Whether this condition has the given type and status "True"
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.type_ == condition_type && self.status == "True"
    }
}
