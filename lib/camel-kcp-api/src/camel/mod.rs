//! Bindings to the Camel K resources created in tenant workspaces

pub mod integration_platform;

pub use integration_platform::IntegrationPlatform;

/// API group for Camel K resources
pub const CAMEL_GROUP: &str = "camel.apache.org";
