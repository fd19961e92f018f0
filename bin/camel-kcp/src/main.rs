use anyhow::Result;
use camel_kcp_api::kcp::APIS_GROUP;
use camel_kcp_core::bundle::{ProvisioningBundle, TenantCategory};
use camel_kcp_core::resolver::resolve;
use camel_kcp_core::{
    BindingProvisioner, ClusterClientCache, ClusterScope, Error, ExportReference,
    KubeClientFactory, KubeExportSource, ServiceConfiguration,
};
use kube::Client;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod binding_controller;
mod ingress_controller;
mod metrics;
mod queue;

use binding_controller::BindingController;
use ingress_controller::IngressController;
use metrics::ReconcileMetrics;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Clients of one resolved virtual workspace
struct VirtualWorkspace {
    /// Watches every logical cluster at once
    wildcard: Client,
    /// Writes to one logical cluster at a time
    tenants: Arc<ClusterClientCache<KubeClientFactory>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting camel-kcp...");

    let config = load_config()?;
    let base = kube::Config::infer().await?;
    KubeExportSource::new(Client::try_from(base.clone())?)
        .ensure_group_served(APIS_GROUP)
        .await?;
    let metrics = ReconcileMetrics::new()?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, exiting..."),
                Err(e) => error!("Unable to listen for shutdown signal: {}", e),
            }
            cancel.cancel();
        }
    });

    let mut controllers = JoinSet::new();
    controllers.spawn(metrics::serve(
        metrics.clone(),
        config.controller.metrics_port,
        cancel.clone(),
    ));

    let exports = &config.service.api_exports;
    let Some(camel_k) = connect(&base, &exports.camel_k.api_export_name, &cancel).await? else {
        return Ok(());
    };
    if let Some(bundle) = ProvisioningBundle::for_category(TenantCategory::CamelK, &config) {
        let controller = BindingController::new(
            TenantCategory::CamelK,
            camel_k.wildcard.clone(),
            BindingProvisioner::new(camel_k.tenants.clone(), bundle, config.service.defaults.clone()),
            config.controller.clone(),
            metrics.clone(),
        );
        controllers.spawn(controller.run(cancel.clone()));
    }

    match (&exports.kaoto, ProvisioningBundle::for_category(TenantCategory::Kaoto, &config)) {
        (Some(kaoto_export), Some(bundle)) => {
            let Some(kaoto) = connect(&base, &kaoto_export.api_export_name, &cancel).await? else {
                return Ok(());
            };
            let controller = BindingController::new(
                TenantCategory::Kaoto,
                kaoto.wildcard.clone(),
                BindingProvisioner::new(kaoto.tenants.clone(), bundle, config.service.defaults.clone()),
                config.controller.clone(),
                metrics.clone(),
            );
            controllers.spawn(controller.run(cancel.clone()));

            let relay = IngressController::new(
                kaoto.wildcard.clone(),
                kaoto.tenants.clone(),
                config.service.ingress_relay.clone(),
                config.controller.clone(),
                metrics.clone(),
            );
            controllers.spawn(relay.run(cancel.clone()));
        }
        _ => info!("Kaoto APIExport not configured, Kaoto controllers disabled"),
    }

    while let Some(joined) = controllers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Controller error: {}", e),
            Err(e) => error!("Controller task failed: {}", e),
        }
    }

    Ok(())
}

/// Load the service configuration, then apply environment overrides
fn load_config() -> Result<ServiceConfiguration> {
    let path = env::var("CAMEL_KCP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config = if Path::new(&path).exists() {
        info!("Loading configuration from {}", path);
        ServiceConfiguration::from_file(&path)?
    } else {
        warn!("Configuration file {} not found, using defaults", path);
        ServiceConfiguration::default()
    };

    if let Ok(name) = env::var("API_EXPORT_NAME") {
        config.service.api_exports.camel_k.api_export_name = name;
    }
    if let Ok(namespace) = env::var("NAMESPACE") {
        if !namespace.is_empty() {
            config.service.defaults.operator_namespace = namespace;
        }
    }

    config.validate()?;
    Ok(config)
}

/// Resolves an export and builds its clients; `None` when shutdown was
/// requested while waiting for the export
async fn connect(
    base: &kube::Config,
    export_name: &str,
    cancel: &CancellationToken,
) -> Result<Option<VirtualWorkspace>> {
    let reference = ExportReference::from(export_name);
    info!("Resolving APIExport {:?}", reference);

    let source = KubeExportSource::new(Client::try_from(base.clone())?);
    let endpoint = match resolve(&source, base, &reference, cancel).await {
        Ok(endpoint) => endpoint,
        Err(Error::Cancelled) => {
            info!("Stopped waiting for APIExport {:?}", reference);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    info!("APIExport {:?} is served at {}", reference, endpoint.cluster_url);

    let wildcard = Client::try_from(ClusterScope::Wildcard.config(&endpoint)?)?;
    let tenants = Arc::new(ClusterClientCache::new(KubeClientFactory::new(endpoint)));

    Ok(Some(VirtualWorkspace { wildcard, tenants }))
}
