//! Work queue between the watch stream and the reconcile workers
//!
//! Keys waiting in the queue are deduplicated, and a key is never handed to
//! two workers at once. A key added while it is being reconciled is held
//! back and queued again once that reconcile finishes.

use camel_kcp_core::config::ControllerConfiguration;
use camel_kcp_core::{ClusterObjectKey, EventFilter, EventTracker, Outcome};
use futures::{stream, Stream, StreamExt};
use kube::Resource;
use kube_runtime::watcher;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::metrics::ReconcileMetrics;

#[derive(Default)]
struct QueueState {
    /// Sent to the channel, not yet taken by a worker
    pending: HashSet<ClusterObjectKey>,
    /// Taken by a worker
    processing: HashSet<ClusterObjectKey>,
    /// Added while processing
    dirty: HashSet<ClusterObjectKey>,
}

/// Enqueues keys, immediately or after a delay
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<ClusterObjectKey>,
    state: Arc<Mutex<QueueState>>,
}

impl QueueHandle {
    pub fn add(&self, key: ClusterObjectKey) {
        let mut state = self.lock();
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if !state.pending.insert(key.clone()) {
            return;
        }
        self.send(key);
    }

    pub fn add_after(&self, key: ClusterObjectKey, delay: Duration) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.add(key);
        });
    }

    /// Marks a key taken by a worker
    fn start(&self, key: &ClusterObjectKey) {
        let mut state = self.lock();
        state.pending.remove(key);
        state.processing.insert(key.clone());
    }

    /// Releases a key once its reconcile returned, queueing it again when
    /// it was added in the meantime
    fn finish(&self, key: &ClusterObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) {
            state.pending.insert(key.clone());
            self.send(key.clone());
        }
    }

    fn send(&self, key: ClusterObjectKey) {
        if self.tx.send(key).is_err() {
            debug!("Work queue closed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WorkQueue {
    handle: QueueHandle,
    rx: mpsc::UnboundedReceiver<ClusterObjectKey>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handle: QueueHandle {
                tx,
                state: Arc::new(Mutex::new(QueueState::default())),
            },
            rx,
        }
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Keys in the order they are taken by workers. Every key yielded must
    /// be released with [`QueueHandle::finish`].
    fn into_stream(self) -> impl Stream<Item = ClusterObjectKey> {
        stream::unfold((self.rx, self.handle), |(mut rx, handle)| async move {
            let key = rx.recv().await?;
            handle.start(&key);
            Some((key, (rx, handle)))
        })
    }

    /// Runs `reconcile` on queued keys with `settings.workers` concurrent
    /// workers. Keys that should be retried are queued again after the
    /// configured delay, and every outcome is recorded under `controller`.
    pub async fn run<F, Fut>(
        self,
        controller: String,
        settings: ControllerConfiguration,
        metrics: ReconcileMetrics,
        reconcile: F,
    ) where
        F: Fn(ClusterObjectKey) -> Fut,
        Fut: Future<Output = camel_kcp_core::Result<Outcome>>,
    {
        let handle = self.handle();
        let workers = settings.workers.max(1);

        self.into_stream()
            .for_each_concurrent(workers, |key| {
                let started = Instant::now();
                let reconciled = reconcile(key.clone());
                let handle = handle.clone();
                let metrics = metrics.clone();
                let controller = controller.as_str();
                let settings = &settings;
                async move {
                    let result = reconciled.await;
                    handle.finish(&key);
                    let outcome = match result {
                        Ok(Outcome::Done) => {
                            debug!("Reconciled {} successfully", key);
                            "done"
                        }
                        Ok(Outcome::RetryLater) => {
                            debug!("Retrying {} in {:?}", key, settings.retry_after());
                            handle.add_after(key, settings.retry_after());
                            "retry_later"
                        }
                        Err(e) => {
                            error!("Error reconciling {}: {}", key, e);
                            handle.add_after(key, settings.error_requeue());
                            "failed"
                        }
                    };
                    metrics.record(controller, outcome, started.elapsed());
                }
            })
            .await;
    }
}

/// Tracks a watch stream and queues the objects of events passing `filter`
pub async fn enqueue_matching<K, S, F>(events: S, filter: F, queue: QueueHandle)
where
    K: Resource + Clone,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
    F: EventFilter<K>,
{
    let mut tracker = EventTracker::new();
    let mut events = std::pin::pin!(events);

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("Watch error: {}", e);
                continue;
            }
        };
        for object_event in tracker.observe(event) {
            if !filter.matches(&object_event) {
                continue;
            }
            if let Some(key) = ClusterObjectKey::of(object_event.object()) {
                queue.add(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camel_kcp_api::CLUSTER_ANNOTATION;
    use camel_kcp_core::{LogicalCluster, ObjectEvent};
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::ResourceExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(cluster: &str, name: &str) -> ClusterObjectKey {
        ClusterObjectKey {
            cluster: LogicalCluster::new(cluster).unwrap(),
            namespace: None,
            name: name.to_string(),
        }
    }

    fn settings() -> ControllerConfiguration {
        ControllerConfiguration {
            workers: 2,
            retry_after_seconds: 5,
            error_requeue_seconds: 60,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pending_keys_are_deduplicated() {
        let queue = WorkQueue::new();
        let handle = queue.handle();
        handle.add(key("acme", "camel-k"));
        handle.add(key("acme", "camel-k"));
        handle.add(key("globex", "camel-k"));

        let mut keys = Box::pin(queue.into_stream());
        assert_eq!(keys.next().await, Some(key("acme", "camel-k")));
        assert_eq!(keys.next().await, Some(key("globex", "camel-k")));

        handle.finish(&key("acme", "camel-k"));
        handle.add(key("acme", "camel-k"));
        assert_eq!(keys.next().await, Some(key("acme", "camel-k")));
    }

    #[tokio::test]
    async fn test_key_added_while_processing_waits_for_finish() {
        let queue = WorkQueue::new();
        let handle = queue.handle();
        handle.add(key("acme", "camel-k"));

        let mut keys = Box::pin(queue.into_stream());
        assert_eq!(keys.next().await, Some(key("acme", "camel-k")));

        handle.add(key("acme", "camel-k"));
        handle.add(key("acme", "camel-k"));
        handle.add(key("globex", "camel-k"));
        assert_eq!(keys.next().await, Some(key("globex", "camel-k")));

        handle.finish(&key("acme", "camel-k"));
        assert_eq!(keys.next().await, Some(key("acme", "camel-k")));

        handle.finish(&key("acme", "camel-k"));
        handle.finish(&key("globex", "camel-k"));
        handle.add(key("globex", "camel-k"));
        assert_eq!(keys.next().await, Some(key("globex", "camel-k")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_is_never_reconciled_concurrently() {
        let queue = WorkQueue::new();
        let handle = queue.handle();
        let metrics = ReconcileMetrics::new().unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let settings = ControllerConfiguration {
            workers: 4,
            ..settings()
        };

        let running = {
            let (active, peak, finished) = (active.clone(), peak.clone(), finished.clone());
            tokio::spawn(queue.run("test".to_string(), settings, metrics, move |_key| {
                let (active, peak, finished) = (active.clone(), peak.clone(), finished.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::Done)
                }
            }))
        };

        handle.add(key("acme", "camel-k"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.add(key("acme", "camel-k"));

        while finished.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        running.abort();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_add() {
        let queue = WorkQueue::new();
        let handle = queue.handle();
        let started = tokio::time::Instant::now();
        handle.add_after(key("acme", "camel-k"), Duration::from_secs(5));

        let mut keys = Box::pin(queue.into_stream());
        assert_eq!(keys.next().await, Some(key("acme", "camel-k")));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_later_is_requeued() {
        let queue = WorkQueue::new();
        queue.handle().add(key("acme", "camel-k"));
        let metrics = ReconcileMetrics::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let running = {
            let calls = calls.clone();
            let metrics = metrics.clone();
            tokio::spawn(queue.run("test".to_string(), settings(), metrics, move |_key| {
                let calls = calls.clone();
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => Ok(Outcome::RetryLater),
                        _ => Ok(Outcome::Done),
                    }
                }
            }))
        };

        while calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        running.abort();

        let text = metrics.gather().unwrap();
        assert!(text.contains(r#"camel_kcp_reconcile_total{controller="test",outcome="retry_later"} 1"#));
        assert!(text.contains(r#"camel_kcp_reconcile_total{controller="test",outcome="done"} 1"#));
    }

    /// Passes every event
    struct Everything;

    impl EventFilter<ConfigMap> for Everything {
        fn matches(&self, _event: &ObjectEvent<ConfigMap>) -> bool {
            true
        }
    }

    fn config_map(cluster: &str, name: &str) -> ConfigMap {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some(name.to_string());
        cm.annotations_mut()
            .insert(CLUSTER_ANNOTATION.to_string(), cluster.to_string());
        cm
    }

    #[tokio::test]
    async fn test_matching_events_are_queued_by_cluster() {
        let queue = WorkQueue::new();
        let events = stream::iter(vec![
            Ok(watcher::Event::Apply(config_map("acme", "settings"))),
            Ok(watcher::Event::Apply(config_map("globex", "settings"))),
            Ok(watcher::Event::Apply(ConfigMap::default())),
        ]);

        enqueue_matching(events, Everything, queue.handle()).await;

        let mut keys = Box::pin(queue.into_stream());
        assert_eq!(keys.next().await, Some(key("acme", "settings")));
        assert_eq!(keys.next().await, Some(key("globex", "settings")));
    }
}
