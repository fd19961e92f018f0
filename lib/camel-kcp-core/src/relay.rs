//! Republishes the external address of tenant ingresses
//!
//! The address assigned to an ingress by the load balancer is only visible
//! in its status. The relay copies it, as a URL, into an annotation of the
//! tenant-facing ingress of the same name.

use k8s_openapi::api::networking::v1::{Ingress, IngressLoadBalancerIngress};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::IngressApi;
use crate::config::IngressRelayConfig;
use crate::events::{ClusterObjectKey, EventFilter, ObjectEvent};
use crate::provisioner::Outcome;
use crate::{ClientSource, LogicalCluster, Result};

/// Selects ingress updates that changed the load balancer addresses
#[derive(Clone, Debug)]
pub struct IngressAddressFilter {
    namespace: String,
}

impl IngressAddressFilter {
    /// Only ingresses in `namespace` are considered
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl EventFilter<Ingress> for IngressAddressFilter {
    fn matches(&self, event: &ObjectEvent<Ingress>) -> bool {
        match event {
            ObjectEvent::Updated { old, new } => {
                new.namespace().as_deref() == Some(self.namespace.as_str())
                    && addresses(old) != addresses(new)
            }
            _ => false,
        }
    }
}

fn addresses(ingress: &Ingress) -> &[IngressLoadBalancerIngress] {
    ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default()
}

pub struct IngressStatusRelay<S> {
    clients: Arc<S>,
    config: IngressRelayConfig,
}

impl<S> IngressStatusRelay<S>
where
    S: ClientSource,
    S::Client: IngressApi,
{
    pub fn new(clients: Arc<S>, config: IngressRelayConfig) -> Self {
        Self { clients, config }
    }

    /// Re-reads the ingress named by `key` and publishes its first load
    /// balancer address. Ingresses that are gone or have no address yet are
    /// left alone.
    pub async fn reconcile(&self, key: &ClusterObjectKey) -> Result<Outcome> {
        info!("Reconciling Ingress {}", key);
        let namespace = key
            .namespace
            .as_deref()
            .unwrap_or(&self.config.source_namespace);
        let client = self.clients.for_cluster(&key.cluster).await?;

        let Some(ingress) = client.get_ingress(namespace, &key.name).await? else {
            debug!("Ingress {} is gone", key);
            return Ok(Outcome::Done);
        };
        let Some(url) = self.external_url(&key.cluster, &ingress) else {
            debug!("Ingress {} has no load balancer address yet", key);
            return Ok(Outcome::Done);
        };

        info!(
            "Publishing {} on Ingress {}/{} in {}",
            url, self.config.target_namespace, key.name, key.cluster
        );
        client
            .annotate_ingress(
                &self.config.target_namespace,
                &key.name,
                &self.config.annotation,
                &url,
            )
            .await?;
        Ok(Outcome::Done)
    }

    fn external_url(&self, cluster: &LogicalCluster, ingress: &Ingress) -> Option<String> {
        let first = addresses(ingress).first()?;
        let host = first
            .ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .or_else(|| first.hostname.as_deref().filter(|h| !h.is_empty()))?;
        Some(format!("{}://{}/{}/kaoto", self.config.scheme, host, cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockIngressApi;
    use crate::events::EventTracker;
    use crate::fake::Fixed;
    use crate::Error;
    use camel_kcp_api::CLUSTER_ANNOTATION;
    use k8s_openapi::api::networking::v1::{IngressLoadBalancerStatus, IngressStatus};
    use kube::runtime::watcher;

    fn ingress(namespace: &str, ip: Option<&str>, hostname: Option<&str>) -> Ingress {
        let mut ingress = Ingress::default();
        ingress.metadata.name = Some("kaoto".to_string());
        ingress.metadata.namespace = Some(namespace.to_string());
        ingress
            .annotations_mut()
            .insert(CLUSTER_ANNOTATION.to_string(), "acme".to_string());
        if ip.is_some() || hostname.is_some() {
            ingress.status = Some(IngressStatus {
                load_balancer: Some(IngressLoadBalancerStatus {
                    ingress: Some(vec![IngressLoadBalancerIngress {
                        ip: ip.map(str::to_string),
                        hostname: hostname.map(str::to_string),
                        ..Default::default()
                    }]),
                }),
            });
        }
        ingress
    }

    fn key() -> ClusterObjectKey {
        ClusterObjectKey {
            cluster: LogicalCluster::new("acme").unwrap(),
            namespace: Some("kaoto-ingress".to_string()),
            name: "kaoto".to_string(),
        }
    }

    fn relay(mock: MockIngressApi) -> IngressStatusRelay<Fixed<MockIngressApi>> {
        IngressStatusRelay::new(Arc::new(Fixed(Arc::new(mock))), IngressRelayConfig::default())
    }

    #[tokio::test]
    async fn test_address_is_published_on_target_ingress() {
        let mut mock = MockIngressApi::new();
        mock.expect_get_ingress()
            .withf(|namespace, name| namespace == "kaoto-ingress" && name == "kaoto")
            .returning(|_, _| Ok(Some(ingress("kaoto-ingress", Some("10.0.0.1"), None))));
        mock.expect_annotate_ingress()
            .withf(|namespace, name, key, value| {
                namespace == "kaoto"
                    && name == "kaoto"
                    && key == "kaoto.io/ingress"
                    && value == "http://10.0.0.1/acme/kaoto"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let outcome = relay(mock).reconcile(&key()).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
    }

    #[tokio::test]
    async fn test_hostname_is_used_without_ip() {
        let mut mock = MockIngressApi::new();
        mock.expect_get_ingress()
            .returning(|_, _| Ok(Some(ingress("kaoto-ingress", None, Some("lb.example.com")))));
        mock.expect_annotate_ingress()
            .withf(|_, _, _, value| value == "http://lb.example.com/acme/kaoto")
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        relay(mock).reconcile(&key()).await.unwrap();
    }

    #[tokio::test]
    async fn test_nothing_is_written_without_address() {
        let mut mock = MockIngressApi::new();
        mock.expect_get_ingress()
            .returning(|_, _| Ok(Some(ingress("kaoto-ingress", None, None))));
        mock.expect_annotate_ingress().never();

        let outcome = relay(mock).reconcile(&key()).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
    }

    #[tokio::test]
    async fn test_deleted_ingress_is_ignored() {
        let mut mock = MockIngressApi::new();
        mock.expect_get_ingress().returning(|_, _| Ok(None));
        mock.expect_annotate_ingress().never();

        let outcome = relay(mock).reconcile(&key()).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
    }

    #[tokio::test]
    async fn test_missing_target_fails() {
        let mut mock = MockIngressApi::new();
        mock.expect_get_ingress()
            .returning(|_, _| Ok(Some(ingress("kaoto-ingress", Some("10.0.0.1"), None))));
        mock.expect_annotate_ingress().returning(|namespace, name, _, _| {
            Err(Error::MissingTarget {
                kind: "Ingress",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
        });

        let result = relay(mock).reconcile(&key()).await;
        assert!(matches!(result, Err(Error::MissingTarget { .. })));
    }

    #[test]
    fn test_only_address_changes_pass_the_filter() {
        let filter = IngressAddressFilter::new("kaoto-ingress");
        let mut tracker = EventTracker::new();

        let mut passed = |event: watcher::Event<Ingress>| {
            tracker
                .observe(event)
                .iter()
                .filter(|e| filter.matches(e))
                .count()
        };

        assert_eq!(passed(watcher::Event::Apply(ingress("kaoto-ingress", None, None))), 0);
        assert_eq!(
            passed(watcher::Event::Apply(ingress("kaoto-ingress", Some("10.0.0.1"), None))),
            1
        );
        // Unchanged status, e.g. a resync or a metadata-only update
        assert_eq!(
            passed(watcher::Event::Apply(ingress("kaoto-ingress", Some("10.0.0.1"), None))),
            0
        );
        assert_eq!(
            passed(watcher::Event::Apply(ingress("kaoto-ingress", Some("10.0.0.2"), None))),
            1
        );
        assert_eq!(
            passed(watcher::Event::Delete(ingress("kaoto-ingress", Some("10.0.0.2"), None))),
            0
        );
    }

    #[test]
    fn test_other_namespaces_do_not_pass_the_filter() {
        let filter = IngressAddressFilter::new("kaoto-ingress");
        let event = ObjectEvent::Updated {
            old: ingress("kaoto", None, None),
            new: ingress("kaoto", Some("10.0.0.1"), None),
        };
        assert!(!filter.matches(&event));
    }
}
