//! APIBinding controller provisioning bound workspaces

use camel_kcp_api::APIBinding;
use camel_kcp_core::bundle::TenantCategory;
use camel_kcp_core::client::TenantResources;
use camel_kcp_core::config::ControllerConfiguration;
use camel_kcp_core::{BindingFilter, BindingProvisioner, ClientSource};
use kube::{Api, Client};
use kube_runtime::{watcher, WatchStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::ReconcileMetrics;
use crate::queue::{enqueue_matching, WorkQueue};

pub struct BindingController<S> {
    category: TenantCategory,
    client: Client,
    provisioner: Arc<BindingProvisioner<S>>,
    settings: ControllerConfiguration,
    metrics: ReconcileMetrics,
}

impl<S> BindingController<S>
where
    S: ClientSource + 'static,
    S::Client: TenantResources,
{
    /// `client` watches the wildcard view of the category's export
    pub fn new(
        category: TenantCategory,
        client: Client,
        provisioner: BindingProvisioner<S>,
        settings: ControllerConfiguration,
        metrics: ReconcileMetrics,
    ) -> Self {
        Self {
            category,
            client,
            provisioner: Arc::new(provisioner),
            settings,
            metrics,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("Starting {} APIBinding reconciliation", self.category);

        let bindings: Api<APIBinding> = Api::all(self.client.clone());
        let events = watcher(bindings, watcher::Config::default()).default_backoff();

        let queue = WorkQueue::new();
        let handle = queue.handle();
        let provisioner = self.provisioner.clone();
        let workers = queue.run(
            format!("{}-apibinding", self.category),
            self.settings.clone(),
            self.metrics.clone(),
            move |key| {
                let provisioner = provisioner.clone();
                async move { provisioner.reconcile(&key).await }
            },
        );

        tokio::select! {
            _ = enqueue_matching(events, BindingFilter, handle) => {
                info!("{} APIBinding watch ended", self.category);
            }
            _ = workers => {}
            _ = cancel.cancelled() => {
                info!("Stopping {} APIBinding reconciliation", self.category);
            }
        }

        Ok(())
    }
}
