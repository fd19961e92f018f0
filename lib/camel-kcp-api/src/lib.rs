//! API types consumed and produced by the camel-kcp controllers
//!
//! This library defines typed bindings for:
//! - APIExport / APIBinding: kcp's published API surfaces and tenant bindings
//! - Placement: kcp scheduling placement created in tenant workspaces
//! - IntegrationPlatform: the Camel K platform created in tenant workspaces

pub mod camel;
pub mod kcp;

pub use camel::IntegrationPlatform;
pub use kcp::{APIBinding, APIExport, BindingPhase, Placement};

/// Annotation kcp sets on every object served through a virtual workspace,
/// naming the logical cluster the object lives in.
pub const CLUSTER_ANNOTATION: &str = "kcp.io/cluster";
