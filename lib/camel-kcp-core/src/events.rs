//! Object events derived from watch streams
//!
//! The watcher only reports the latest state of an object. [`EventTracker`]
//! remembers the previous state of each object so that filters can tell
//! creations from updates and compare old and new objects.

use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;

use crate::LogicalCluster;

/// Identity of an object across logical clusters, also used as the
/// reconcile request
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterObjectKey {
    pub cluster: LogicalCluster,
    pub namespace: Option<String>,
    pub name: String,
}

impl ClusterObjectKey {
    /// Key of an object served by a virtual workspace, `None` when the
    /// object carries no logical cluster annotation
    pub fn of<K: Resource>(obj: &K) -> Option<Self> {
        Some(Self {
            cluster: LogicalCluster::of(obj)?,
            namespace: obj.namespace(),
            name: obj.name_any(),
        })
    }
}

impl fmt::Display for ClusterObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}|{}/{}", self.cluster, namespace, self.name),
            None => write!(f, "{}|{}", self.cluster, self.name),
        }
    }
}

/// A change to a watched object
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectEvent<K> {
    Created(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K> ObjectEvent<K> {
    /// The latest known state of the object
    pub fn object(&self) -> &K {
        match self {
            ObjectEvent::Created(obj) => obj,
            ObjectEvent::Updated { new, .. } => new,
            ObjectEvent::Deleted(obj) => obj,
        }
    }
}

/// Decides which events of a resource type are worth reconciling
pub trait EventFilter<K> {
    fn matches(&self, event: &ObjectEvent<K>) -> bool;
}

/// Derives [`ObjectEvent`]s from a watcher stream
pub struct EventTracker<K> {
    known: HashMap<ClusterObjectKey, K>,
    relisted: Option<HashSet<ClusterObjectKey>>,
}

impl<K: Resource + Clone> EventTracker<K> {
    pub fn new() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }

    /// Feed one watcher event, returning the derived object events
    pub fn observe(&mut self, event: watcher::Event<K>) -> Vec<ObjectEvent<K>> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                let Some(key) = Self::key(&obj) else {
                    return Vec::new();
                };
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(key.clone());
                }
                vec![self.apply(key, obj)]
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<_> = self
                    .known
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(ObjectEvent::Deleted)
                    .collect()
            }
            watcher::Event::Apply(obj) => match Self::key(&obj) {
                Some(key) => vec![self.apply(key, obj)],
                None => Vec::new(),
            },
            watcher::Event::Delete(obj) => {
                if let Some(key) = Self::key(&obj) {
                    self.known.remove(&key);
                }
                vec![ObjectEvent::Deleted(obj)]
            }
        }
    }

    /// Number of objects currently known
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    fn apply(&mut self, key: ClusterObjectKey, obj: K) -> ObjectEvent<K> {
        match self.known.insert(key, obj.clone()) {
            Some(old) => ObjectEvent::Updated { old, new: obj },
            None => ObjectEvent::Created(obj),
        }
    }

    fn key(obj: &K) -> Option<ClusterObjectKey> {
        let key = ClusterObjectKey::of(obj);
        if key.is_none() {
            warn!("Ignoring {} without logical cluster annotation", obj.name_any());
        }
        key
    }
}

impl<K: Resource + Clone> Default for EventTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}
