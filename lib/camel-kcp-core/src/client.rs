//! Tenant-scoped clients
//!
//! Every write issued by the controllers goes through a client obtained from
//! a [`ClientSource`] for one logical cluster. [`ClusterClientCache`] builds
//! each tenant's client once and shares it between reconcile workers.

use async_trait::async_trait;
use camel_kcp_api::{IntegrationPlatform, Placement};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::bundle::Manifest;
use crate::{ClusterScope, Error, LogicalCluster, Result, FIELD_MANAGER};

/// Namespace reads and writes
#[async_trait]
pub trait NamespaceApi: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;
    async fn create_namespace(&self, name: &str) -> Result<()>;
}

/// IntegrationPlatform reads and writes
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn get_platform(&self, namespace: &str, name: &str) -> Result<Option<IntegrationPlatform>>;
    async fn create_platform(&self, platform: &IntegrationPlatform) -> Result<()>;
}

/// Placement reads and writes
#[async_trait]
pub trait PlacementApi: Send + Sync {
    async fn get_placement(&self, name: &str) -> Result<Option<Placement>>;
    async fn create_placement(&self, placement: &Placement) -> Result<()>;
}

/// Forced server-side apply of catalog objects, owned by [`FIELD_MANAGER`]
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    async fn apply(&self, manifest: &Manifest) -> Result<()>;
}

/// Ingress reads and annotation writes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IngressApi: Send + Sync {
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>>;

    /// Sets one annotation on an existing ingress; fails with
    /// [`Error::MissingTarget`] when the ingress does not exist, and never
    /// recreates an ingress deleted while the annotation is written.
    async fn annotate_ingress(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;
}

/// Everything binding provisioning writes to a tenant
pub trait TenantResources: NamespaceApi + PlatformApi + PlacementApi + ManifestApplier {}

impl<T: NamespaceApi + PlatformApi + PlacementApi + ManifestApplier> TenantResources for T {}

/// Hands out clients scoped to one logical cluster
#[async_trait]
pub trait ClientSource: Send + Sync {
    type Client: Send + Sync + 'static;

    async fn for_cluster(&self, cluster: &LogicalCluster) -> Result<Arc<Self::Client>>;
}

/// Builds the client of one logical cluster
pub trait ClientFactory: Send + Sync {
    type Client: Send + Sync + 'static;

    fn build(&self, cluster: &LogicalCluster) -> Result<Self::Client>;
}

/// Memoizes one client per logical cluster for the process lifetime
pub struct ClusterClientCache<F: ClientFactory> {
    factory: F,
    clients: RwLock<HashMap<LogicalCluster, Arc<F::Client>>>,
}

impl<F: ClientFactory> ClusterClientCache<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached clients
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[async_trait]
impl<F: ClientFactory> ClientSource for ClusterClientCache<F> {
    type Client = F::Client;

    async fn for_cluster(&self, cluster: &LogicalCluster) -> Result<Arc<F::Client>> {
        if let Some(client) = self.clients.read().await.get(cluster) {
            return Ok(client.clone());
        }

        // Built outside the lock so that lookups for other clusters are not
        // held up; a concurrent build for the same cluster loses to the
        // entry stored first.
        let built = Arc::new(self.factory.build(cluster)?);

        let mut clients = self.clients.write().await;
        let client = clients
            .entry(cluster.clone())
            .or_insert_with(|| {
                debug!("Cached client for logical cluster {}", cluster);
                built
            })
            .clone();
        Ok(client)
    }
}

/// Builds kube clients rooted at `<virtual workspace>/clusters/<cluster>`
pub struct KubeClientFactory {
    base: kube::Config,
}

impl KubeClientFactory {
    /// `base` must point at the virtual workspace URL of the export
    pub fn new(base: kube::Config) -> Self {
        Self { base }
    }
}

impl ClientFactory for KubeClientFactory {
    type Client = TenantClient;

    fn build(&self, cluster: &LogicalCluster) -> Result<TenantClient> {
        let config = ClusterScope::Cluster(cluster.clone()).config(&self.base)?;
        let client = Client::try_from(config)?;
        debug!("Created client for logical cluster {}", cluster);
        Ok(TenantClient {
            cluster: cluster.clone(),
            client,
        })
    }
}

/// Kubernetes client bound to one logical cluster
#[derive(Clone)]
pub struct TenantClient {
    cluster: LogicalCluster,
    client: Client,
}

impl TenantClient {
    pub fn cluster(&self) -> &LogicalCluster {
        &self.cluster
    }

    async fn apply_cluster_scoped<K>(&self, obj: &K) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
    {
        let api: Api<K> = Api::all(self.client.clone());
        api.patch(&obj.name_any(), &apply_params(), &Patch::Apply(obj))
            .await?;
        debug!("Applied {} {} in {}", K::kind(&()), obj.name_any(), self.cluster);
        Ok(())
    }

    async fn apply_namespaced<K>(&self, obj: &K) -> Result<()>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let namespace = obj.namespace().ok_or_else(|| {
            Error::Config(format!("{} {} has no namespace", K::kind(&()), obj.name_any()))
        })?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(&obj.name_any(), &apply_params(), &Patch::Apply(obj))
            .await?;
        debug!(
            "Applied {} {}/{} in {}",
            K::kind(&()),
            namespace,
            obj.name_any(),
            self.cluster
        );
        Ok(())
    }
}

fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

#[async_trait]
impl NamespaceApi for TenantClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &namespace).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformApi for TenantClient {
    async fn get_platform(&self, namespace: &str, name: &str) -> Result<Option<IntegrationPlatform>> {
        let api: Api<IntegrationPlatform> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_platform(&self, platform: &IntegrationPlatform) -> Result<()> {
        let namespace = platform.namespace().unwrap_or_default();
        let api: Api<IntegrationPlatform> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), platform).await?;
        Ok(())
    }
}

#[async_trait]
impl PlacementApi for TenantClient {
    async fn get_placement(&self, name: &str) -> Result<Option<Placement>> {
        let api: Api<Placement> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_placement(&self, placement: &Placement) -> Result<()> {
        let api: Api<Placement> = Api::all(self.client.clone());
        api.create(&PostParams::default(), placement).await?;
        Ok(())
    }
}

#[async_trait]
impl ManifestApplier for TenantClient {
    async fn apply(&self, manifest: &Manifest) -> Result<()> {
        match manifest {
            Manifest::ServiceAccount(obj) => self.apply_namespaced(obj).await,
            Manifest::ClusterRole(obj) => self.apply_cluster_scoped(obj).await,
            Manifest::ClusterRoleBinding(obj) => self.apply_cluster_scoped(obj).await,
            Manifest::Deployment(obj) => self.apply_namespaced(obj).await,
            Manifest::Service(obj) => self.apply_namespaced(obj).await,
            Manifest::Ingress(obj) => self.apply_namespaced(obj).await,
        }
    }
}

#[async_trait]
impl IngressApi for TenantClient {
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn annotate_ingress(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let missing = || Error::MissingTarget {
            kind: "Ingress",
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        let ingress = api.get_opt(name).await?.ok_or_else(missing)?;

        let patch = annotation_patch(&ingress, key, value);
        match api.patch(name, &apply_params(), &Patch::Apply(&patch)).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let e = Error::from(e);
                if e.is_not_found() {
                    Err(missing())
                } else {
                    Err(e)
                }
            }
        }
    }
}

/// Apply body setting one annotation on `ingress`.
///
/// The body carries the uid and resource version that were read, so the
/// apply is rejected instead of creating the ingress again when it was
/// deleted or replaced after the read.
fn annotation_patch(ingress: &Ingress, key: &str, value: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": ingress.metadata.name,
            "namespace": ingress.metadata.namespace,
            "uid": ingress.metadata.uid,
            "resourceVersion": ingress.metadata.resource_version,
            "annotations": {
                (key): value
            }
        }
    })
}
