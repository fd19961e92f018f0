//! In-memory tenants for reconcile tests

use async_trait::async_trait;
use camel_kcp_api::{IntegrationPlatform, Placement};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::bundle::{Manifest, KAOTO_NAMESPACE};
use crate::client::{ManifestApplier, NamespaceApi, PlacementApi, PlatformApi};
use crate::error::not_found;
use crate::{ClientSource, Error, LogicalCluster, Result};

/// Write operations that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Op {
    CreateNamespace,
    CreatePlatform,
    CreatePlacement,
    Apply,
}

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    platforms: BTreeMap<(String, String), IntegrationPlatform>,
    placements: BTreeMap<String, Placement>,
    applied: Vec<(String, String)>,
    creates: usize,
    failures: Vec<(Op, kube::Error)>,
}

/// A workspace that behaves like the API server for the calls the
/// provisioner makes: creates fail with AlreadyExists on duplicates and
/// namespaced writes fail with NotFound until their namespace exists.
#[derive(Default)]
pub(crate) struct FakeTenant {
    state: Mutex<State>,
}

impl FakeTenant {
    /// The next `op` fails with `error`
    pub(crate) fn fail_next(&self, op: Op, error: kube::Error) {
        self.lock().failures.push((op, error));
    }

    pub(crate) fn namespaces(&self) -> Vec<String> {
        self.lock().namespaces.iter().cloned().collect()
    }

    pub(crate) fn platforms(&self) -> Vec<IntegrationPlatform> {
        self.lock().platforms.values().cloned().collect()
    }

    pub(crate) fn placements(&self) -> Vec<Placement> {
        self.lock().placements.values().cloned().collect()
    }

    /// `(kind, name)` of every applied manifest, in order
    pub(crate) fn applied(&self) -> Vec<(String, String)> {
        self.lock().applied.clone()
    }

    /// Number of successful creates
    pub(crate) fn creates(&self) -> usize {
        self.lock().creates
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl State {
    fn injected(&mut self, op: Op) -> Result<()> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(index) => Err(Error::Kube(self.failures.remove(index).1)),
            None => Ok(()),
        }
    }

    fn require_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(Error::Kube(not_found(format!("namespaces \"{}\" not found", namespace))))
        }
    }
}

fn duplicate(kind: &str, name: &str) -> Error {
    Error::Kube(crate::error::already_exists(format!(
        "{} \"{}\" already exists",
        kind, name
    )))
}

#[async_trait]
impl NamespaceApi for FakeTenant {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let state = self.lock();
        Ok(state.namespaces.get(name).map(|name| Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.injected(Op::CreateNamespace)?;
        if !state.namespaces.insert(name.to_string()) {
            return Err(duplicate("namespaces", name));
        }
        state.creates += 1;
        Ok(())
    }
}

#[async_trait]
impl PlatformApi for FakeTenant {
    async fn get_platform(&self, namespace: &str, name: &str) -> Result<Option<IntegrationPlatform>> {
        let state = self.lock();
        Ok(state
            .platforms
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_platform(&self, platform: &IntegrationPlatform) -> Result<()> {
        let mut state = self.lock();
        state.injected(Op::CreatePlatform)?;
        let key = (platform.namespace().unwrap_or_default(), platform.name_any());
        state.require_namespace(&key.0)?;
        if state.platforms.contains_key(&key) {
            return Err(duplicate("integrationplatforms", &key.1));
        }
        state.platforms.insert(key, platform.clone());
        state.creates += 1;
        Ok(())
    }
}

#[async_trait]
impl PlacementApi for FakeTenant {
    async fn get_placement(&self, name: &str) -> Result<Option<Placement>> {
        Ok(self.lock().placements.get(name).cloned())
    }

    async fn create_placement(&self, placement: &Placement) -> Result<()> {
        let mut state = self.lock();
        state.injected(Op::CreatePlacement)?;
        let name = placement.name_any();
        if state.placements.contains_key(&name) {
            return Err(duplicate("placements", &name));
        }
        state.placements.insert(name, placement.clone());
        state.creates += 1;
        Ok(())
    }
}

#[async_trait]
impl ManifestApplier for FakeTenant {
    async fn apply(&self, manifest: &Manifest) -> Result<()> {
        let mut state = self.lock();
        state.injected(Op::Apply)?;
        match manifest {
            Manifest::ClusterRole(_) | Manifest::ClusterRoleBinding(_) => {}
            _ => state.require_namespace(KAOTO_NAMESPACE)?,
        }
        state
            .applied
            .push((manifest.kind().to_string(), manifest.name().to_string()));
        Ok(())
    }
}

/// Hands out one [`FakeTenant`] per logical cluster
#[derive(Default)]
pub(crate) struct FakeTenants {
    tenants: Mutex<HashMap<LogicalCluster, Arc<FakeTenant>>>,
}

impl FakeTenants {
    pub(crate) fn tenant(&self, cluster: &LogicalCluster) -> Arc<FakeTenant> {
        self.tenants
            .lock()
            .unwrap()
            .entry(cluster.clone())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl ClientSource for FakeTenants {
    type Client = FakeTenant;

    async fn for_cluster(&self, cluster: &LogicalCluster) -> Result<Arc<FakeTenant>> {
        Ok(self.tenant(cluster))
    }
}

/// Hands out the same client for every logical cluster
pub(crate) struct Fixed<C>(pub Arc<C>);

#[async_trait]
impl<C: Send + Sync + 'static> ClientSource for Fixed<C> {
    type Client = C;

    async fn for_cluster(&self, _cluster: &LogicalCluster) -> Result<Arc<C>> {
        Ok(self.0.clone())
    }
}
