//! Logical cluster (tenant workspace) identifiers

use camel_kcp_api::CLUSTER_ANNOTATION;
use kube::{Resource, ResourceExt};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Opaque identifier of a kcp logical cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalCluster(String);

impl LogicalCluster {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name == "*" || name.contains('/') {
            return Err(Error::InvalidCluster(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads the logical cluster an object served by a virtual workspace
    /// belongs to.
    pub fn of<K: Resource>(obj: &K) -> Option<Self> {
        obj.annotations()
            .get(CLUSTER_ANNOTATION)
            .and_then(|name| Self::new(name.as_str()).ok())
    }
}

impl FromStr for LogicalCluster {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for LogicalCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which logical clusters a virtual workspace client addresses
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterScope {
    /// Every cluster that bound the export, used for watching
    Wildcard,
    /// A single tenant, used for reads and writes
    Cluster(LogicalCluster),
}

impl ClusterScope {
    /// Appends the `/clusters/<name>` segment to a virtual workspace URL
    pub fn url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        match self {
            ClusterScope::Wildcard => format!("{}/clusters/*", base),
            ClusterScope::Cluster(cluster) => format!("{}/clusters/{}", base, cluster),
        }
    }

    /// Clones `base` so that it targets this scope
    pub fn config(&self, base: &kube::Config) -> Result<kube::Config> {
        let url = self.url(&base.cluster_url.to_string());
        let mut config = base.clone();
        config.cluster_url = url.parse::<http::Uri>().map_err(|e| Error::InvalidEndpoint {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }
}
