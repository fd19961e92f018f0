//! Resolution of an APIExport to its virtual workspace endpoint
//!
//! kcp publishes the virtual workspace URLs of an export asynchronously, so
//! the resolver lists once and, when no ready export is found, watches until
//! the first ready status shows up.

use async_trait::async_trait;
use camel_kcp_api::APIExport;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIGroupList;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Which APIExport to resolve
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportReference {
    /// The export with this name
    Named(String),
    /// The only export visible to the caller
    Unique,
}

impl From<&str> for ExportReference {
    fn from(name: &str) -> Self {
        if name.is_empty() {
            ExportReference::Unique
        } else {
            ExportReference::Named(name.to_string())
        }
    }
}

impl ExportReference {
    fn field_selector(&self) -> Option<String> {
        match self {
            ExportReference::Named(name) => Some(format!("metadata.name={}", name)),
            ExportReference::Unique => None,
        }
    }
}

/// Exports matching a reference, with the list's resource version
#[derive(Clone, Debug, Default)]
pub struct ExportSnapshot {
    pub items: Vec<APIExport>,
    pub resource_version: String,
}

pub type ExportWatch = BoxStream<'static, kube::Result<WatchEvent<APIExport>>>;

/// Lists and watches APIExports
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExportSource: Send + Sync {
    async fn list(&self, reference: &ExportReference) -> Result<ExportSnapshot>;

    /// Watch exports matching `reference`, starting after `resource_version`
    async fn watch(&self, reference: &ExportReference, resource_version: &str) -> Result<ExportWatch>;
}

/// [`ExportSource`] backed by the API server
pub struct KubeExportSource {
    client: Client,
    api: Api<APIExport>,
}

impl KubeExportSource {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client.clone()),
            client,
        }
    }

    /// Fails with [`Error::GroupNotServed`] unless the server serves `group`
    pub async fn ensure_group_served(&self, group: &str) -> Result<()> {
        let groups = self.client.list_api_groups().await?;
        if serves_group(&groups, group) {
            Ok(())
        } else {
            Err(Error::GroupNotServed {
                group: group.to_string(),
            })
        }
    }
}

/// Whether discovery lists `group`
pub fn serves_group(groups: &APIGroupList, group: &str) -> bool {
    groups.groups.iter().any(|g| g.name == group)
}

#[async_trait]
impl ExportSource for KubeExportSource {
    async fn list(&self, reference: &ExportReference) -> Result<ExportSnapshot> {
        let mut params = ListParams::default();
        if let Some(selector) = reference.field_selector() {
            params = params.fields(&selector);
        }
        let list = self.api.list(&params).await?;
        Ok(ExportSnapshot {
            items: list.items,
            resource_version: list.metadata.resource_version.unwrap_or_default(),
        })
    }

    async fn watch(&self, reference: &ExportReference, resource_version: &str) -> Result<ExportWatch> {
        let mut params = WatchParams::default();
        if let Some(selector) = reference.field_selector() {
            params = params.fields(&selector);
        }
        let stream = self.api.watch(&params, resource_version).await?;
        Ok(stream.boxed())
    }
}

/// Returns a copy of `base` pointing at the virtual workspace of the
/// referenced export, waiting until kcp has published it.
///
/// Fails with [`Error::AmbiguousOrMissing`] when no name is given and the
/// caller does not see exactly one export and [`Error::WatchFailed`] when the
/// watch breaks. Returns [`Error::Cancelled`] as soon as `cancel` fires,
/// including while the list or a watch request is still outstanding.
pub async fn resolve<S>(
    source: &S,
    base: &kube::Config,
    reference: &ExportReference,
    cancel: &CancellationToken,
) -> Result<kube::Config>
where
    S: ExportSource + ?Sized,
{
    let snapshot = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        snapshot = source.list(reference) => snapshot?,
    };

    let watched = match (reference, snapshot.items.as_slice()) {
        (_, [export]) => {
            if let Some(url) = export.ready_url() {
                return endpoint_config(base, url);
            }
            ExportReference::Named(export.name_any())
        }
        (ExportReference::Unique, items) => {
            return Err(Error::AmbiguousOrMissing { found: items.len() });
        }
        (ExportReference::Named(name), _) => ExportReference::Named(name.clone()),
    };

    info!("Waiting for the virtual workspace URL of {:?}", watched);
    let mut resource_version = snapshot.resource_version;

    loop {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            opened = source.watch(&watched, &resource_version) => opened,
        };
        let mut events = opened.map_err(|e| match e {
            Error::Kube(e) => Error::WatchFailed(e),
            other => other,
        })?;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                event = events.next() => event,
            };

            match event {
                Some(Ok(WatchEvent::Added(export))) | Some(Ok(WatchEvent::Modified(export))) => {
                    if let Some(version) = export.resource_version() {
                        resource_version = version;
                    }
                    match export.ready_url() {
                        Some(url) => return endpoint_config(base, url),
                        None => info!("APIExport {} is not ready yet", export.name_any()),
                    }
                }
                Some(Ok(WatchEvent::Deleted(export))) => {
                    if let Some(version) = export.resource_version() {
                        resource_version = version;
                    }
                    debug!("APIExport {} deleted", export.name_any());
                }
                Some(Ok(WatchEvent::Bookmark(bookmark))) => {
                    resource_version = bookmark.metadata.resource_version;
                }
                Some(Ok(WatchEvent::Error(e))) => {
                    return Err(Error::WatchFailed(kube::Error::Api(e)));
                }
                Some(Err(e)) => return Err(Error::WatchFailed(e)),
                None => {
                    debug!("APIExport watch closed, resuming at {}", resource_version);
                    break;
                }
            }
        }
    }
}

fn endpoint_config(base: &kube::Config, url: &str) -> Result<kube::Config> {
    let mut config = base.clone();
    config.cluster_url = url.parse::<http::Uri>().map_err(|e| Error::InvalidEndpoint {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    info!("Using virtual workspace URL {}", url);
    Ok(config)
}
