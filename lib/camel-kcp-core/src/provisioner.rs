//! Provisioning of tenant workspaces once their APIBinding is bound
//!
//! Each step creates its object only when it is absent, so a reconcile can
//! be repeated any number of times. A step that hits a NotFound is retried
//! later: right after binding, kcp may not serve the bound APIs yet.

use camel_kcp_api::{APIBinding, BindingPhase, IntegrationPlatform, Placement};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::bundle::{AuxiliaryBundle, ProvisioningBundle};
use crate::client::TenantResources;
use crate::config::{PlacementTemplate, PlatformDefaults, PlatformTemplate};
use crate::events::{ClusterObjectKey, EventFilter, ObjectEvent};
use crate::{ClientSource, LogicalCluster, Result};

/// Successful result of a reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Everything the reconcile is responsible for exists
    Done,
    /// A dependency is not served yet; deliver the event again later
    RetryLater,
}

/// Selects binding events that should provision the workspace
///
/// Deletions never provision. Creations are accepted alongside updates so a
/// binding already bound when the controller starts still gets its bundle.
#[derive(Clone, Copy, Debug, Default)]
pub struct BindingFilter;

impl EventFilter<APIBinding> for BindingFilter {
    fn matches(&self, event: &ObjectEvent<APIBinding>) -> bool {
        match event {
            ObjectEvent::Created(binding) | ObjectEvent::Updated { new: binding, .. } => {
                binding.phase() == BindingPhase::Bound && !binding.is_deleting()
            }
            ObjectEvent::Deleted(_) => false,
        }
    }
}

/// Provisions the bundle of one tenant category into bound workspaces
pub struct BindingProvisioner<S> {
    clients: Arc<S>,
    bundle: ProvisioningBundle,
    defaults: PlatformDefaults,
}

impl<S> BindingProvisioner<S>
where
    S: ClientSource,
    S::Client: TenantResources,
{
    pub fn new(clients: Arc<S>, bundle: ProvisioningBundle, defaults: PlatformDefaults) -> Self {
        Self {
            clients,
            bundle,
            defaults,
        }
    }

    /// Provisions the workspace of a bound APIBinding.
    ///
    /// Steps run in order and stop at the first one that cannot complete:
    /// platform namespace, platform, placement, auxiliary namespace and
    /// catalog. Returns [`Outcome::RetryLater`] when a step found the bound
    /// APIs not served yet, and an error for any other failure.
    pub async fn reconcile(&self, key: &ClusterObjectKey) -> Result<Outcome> {
        info!("Reconciling APIBinding {}", key);
        let client = self.clients.for_cluster(&key.cluster).await?;
        let cluster = &key.cluster;

        if let Some(template) = &self.bundle.default_platform {
            let platform = self.default_platform(template);
            let namespace = platform.namespace().unwrap_or_default();

            if ensure_namespace(&*client, cluster, &namespace).await? == Outcome::RetryLater {
                return Ok(Outcome::RetryLater);
            }
            if ensure_platform(&*client, cluster, &platform).await? == Outcome::RetryLater {
                return Ok(Outcome::RetryLater);
            }
        }

        if let Some(template) = &self.bundle.default_placement {
            let placement = default_placement(template);
            if ensure_placement(&*client, cluster, &placement).await? == Outcome::RetryLater {
                return Ok(Outcome::RetryLater);
            }
        }

        if let Some(auxiliary) = &self.bundle.auxiliary {
            if install(&*client, cluster, auxiliary).await? == Outcome::RetryLater {
                return Ok(Outcome::RetryLater);
            }
        }

        debug!("APIBinding {} provisioned", key);
        Ok(Outcome::Done)
    }

    /// Platform from the configured template, with the operator namespace
    /// and platform name filled in when the template leaves them empty
    fn default_platform(&self, template: &PlatformTemplate) -> IntegrationPlatform {
        let mut metadata = template.metadata.clone();
        if metadata.namespace.as_deref().unwrap_or_default().is_empty() {
            metadata.namespace = Some(self.defaults.operator_namespace.clone());
        }
        if metadata.name.as_deref().unwrap_or_default().is_empty() {
            metadata.name = Some(self.defaults.platform_name.clone());
        }

        let name = metadata.name.clone().unwrap_or_default();
        let mut platform = IntegrationPlatform::new(&name, template.spec.clone());
        platform.metadata = metadata;
        platform
    }
}

fn default_placement(template: &PlacementTemplate) -> Placement {
    let name = template.metadata.name.clone().unwrap_or_default();
    let mut placement = Placement::new(&name, template.spec.clone());
    placement.metadata = template.metadata.clone();
    placement
}

/// Maps the result of a create to the step outcome
fn settle(result: Result<()>, cluster: &LogicalCluster, what: &str) -> Result<Outcome> {
    match result {
        Ok(()) => Ok(Outcome::Done),
        Err(e) if e.is_already_exists() => {
            debug!("{} already exists in {}", what, cluster);
            Ok(Outcome::Done)
        }
        Err(e) if e.is_not_found() => {
            debug!("Bound APIs are not yet found in {} for {}: {}", cluster, what, e);
            Ok(Outcome::RetryLater)
        }
        Err(e) => Err(e),
    }
}

async fn ensure_namespace<C>(client: &C, cluster: &LogicalCluster, name: &str) -> Result<Outcome>
where
    C: TenantResources + ?Sized,
{
    if client.get_namespace(name).await?.is_some() {
        return Ok(Outcome::Done);
    }
    info!("Creating namespace {} in {}", name, cluster);
    settle(
        client.create_namespace(name).await,
        cluster,
        &format!("namespace {}", name),
    )
}

async fn ensure_platform<C>(
    client: &C,
    cluster: &LogicalCluster,
    platform: &IntegrationPlatform,
) -> Result<Outcome>
where
    C: TenantResources + ?Sized,
{
    let namespace = platform.namespace().unwrap_or_default();
    let name = platform.name_any();
    if client.get_platform(&namespace, &name).await?.is_some() {
        return Ok(Outcome::Done);
    }
    info!("Creating IntegrationPlatform {}/{} in {}", namespace, name, cluster);
    settle(
        client.create_platform(platform).await,
        cluster,
        &format!("IntegrationPlatform {}/{}", namespace, name),
    )
}

async fn ensure_placement<C>(
    client: &C,
    cluster: &LogicalCluster,
    placement: &Placement,
) -> Result<Outcome>
where
    C: TenantResources + ?Sized,
{
    let name = placement.name_any();
    if client.get_placement(&name).await?.is_some() {
        return Ok(Outcome::Done);
    }
    info!("Creating Placement {} in {}", name, cluster);
    settle(
        client.create_placement(placement).await,
        cluster,
        &format!("Placement {}", name),
    )
}

/// Applies the auxiliary catalog in order, stopping at the first failure
async fn install<C>(client: &C, cluster: &LogicalCluster, bundle: &AuxiliaryBundle) -> Result<Outcome>
where
    C: TenantResources + ?Sized,
{
    if ensure_namespace(client, cluster, &bundle.namespace).await? == Outcome::RetryLater {
        return Ok(Outcome::RetryLater);
    }

    for manifest in bundle.manifests(cluster) {
        let what = format!("{} {}", manifest.kind(), manifest.name());
        debug!("Applying {} in {}", what, cluster);
        if settle(client.apply(&manifest).await, cluster, &what)? == Outcome::RetryLater {
            return Ok(Outcome::RetryLater);
        }
    }
    Ok(Outcome::Done)
}
