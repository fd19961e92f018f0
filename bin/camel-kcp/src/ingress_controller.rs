//! Ingress controller relaying load balancer addresses to tenant ingresses

use camel_kcp_core::client::IngressApi;
use camel_kcp_core::config::{ControllerConfiguration, IngressRelayConfig};
use camel_kcp_core::{ClientSource, IngressAddressFilter, IngressStatusRelay};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client};
use kube_runtime::{watcher, WatchStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::ReconcileMetrics;
use crate::queue::{enqueue_matching, WorkQueue};

const CONTROLLER_NAME: &str = "kaoto-ingress";

pub struct IngressController<S> {
    client: Client,
    relay: Arc<IngressStatusRelay<S>>,
    namespace: String,
    settings: ControllerConfiguration,
    metrics: ReconcileMetrics,
}

impl<S> IngressController<S>
where
    S: ClientSource + 'static,
    S::Client: IngressApi,
{
    pub fn new(
        client: Client,
        clients: Arc<S>,
        relay: IngressRelayConfig,
        settings: ControllerConfiguration,
        metrics: ReconcileMetrics,
    ) -> Self {
        Self {
            client,
            namespace: relay.source_namespace.clone(),
            relay: Arc::new(IngressStatusRelay::new(clients, relay)),
            settings,
            metrics,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("Starting Ingress reconciliation in namespace {}", self.namespace);

        let ingresses: Api<Ingress> = Api::all(self.client.clone());
        let selector = format!("metadata.namespace={}", self.namespace);
        let events = watcher(ingresses, watcher::Config::default().fields(&selector)).default_backoff();

        let queue = WorkQueue::new();
        let handle = queue.handle();
        let relay = self.relay.clone();
        let workers = queue.run(
            CONTROLLER_NAME.to_string(),
            self.settings.clone(),
            self.metrics.clone(),
            move |key| {
                let relay = relay.clone();
                async move { relay.reconcile(&key).await }
            },
        );

        tokio::select! {
            _ = enqueue_matching(events, IngressAddressFilter::new(self.namespace.clone()), handle) => {
                info!("Ingress watch ended");
            }
            _ = workers => {}
            _ = cancel.cancelled() => info!("Stopping Ingress reconciliation"),
        }

        Ok(())
    }
}
