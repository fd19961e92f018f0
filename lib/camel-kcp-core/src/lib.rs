//! Control-plane logic for publishing Camel K through kcp
//!
//! This library provides:
//! - Resolution of an APIExport to its virtual workspace endpoint
//! - A per-tenant client cache scoping every call to a logical cluster
//! - Provisioning of default resources when an APIBinding becomes bound
//! - Relaying of observed ingress addresses to the tenant-facing ingress

pub mod bundle;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod provisioner;
pub mod relay;
pub mod resolver;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{ClientSource, ClusterClientCache, KubeClientFactory, TenantClient};
pub use cluster::{ClusterScope, LogicalCluster};
pub use config::ServiceConfiguration;
pub use error::{Error, Result};
pub use events::{ClusterObjectKey, EventFilter, EventTracker, ObjectEvent};
pub use provisioner::{BindingFilter, BindingProvisioner, Outcome};
pub use relay::{IngressAddressFilter, IngressStatusRelay};
pub use resolver::{serves_group, ExportReference, KubeExportSource};

/// Field manager used for every server-side apply issued by camel-kcp
pub const FIELD_MANAGER: &str = "camel-kcp";
