//! Resources provisioned into a workspace once an export is bound

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServiceAccount,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use std::fmt;

use camel_kcp_api::camel::CAMEL_GROUP;

use crate::config::{PlacementTemplate, PlatformTemplate, ServiceConfiguration};
use crate::LogicalCluster;

/// Namespace the Kaoto bundle is installed into
pub const KAOTO_NAMESPACE: &str = "kaoto";

const KAOTO_UI_IMAGE: &str = "ghcr.io/astefanutti/kaoto-ui:latest";
const KAOTO_BACKEND_IMAGE: &str = "ghcr.io/astefanutti/kaoto-backend:latest";

/// The kinds of tenant that get a bundle provisioned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TenantCategory {
    /// Workspaces binding the Camel K export
    CamelK,
    /// Workspaces binding the Kaoto export
    Kaoto,
}

impl fmt::Display for TenantCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantCategory::CamelK => write!(f, "camel-k"),
            TenantCategory::Kaoto => write!(f, "kaoto"),
        }
    }
}

/// Objects created in a workspace when its binding becomes bound
#[derive(Clone, Debug, Default)]
pub struct ProvisioningBundle {
    pub default_platform: Option<PlatformTemplate>,
    pub default_placement: Option<PlacementTemplate>,
    pub auxiliary: Option<AuxiliaryBundle>,
}

impl ProvisioningBundle {
    /// Bundle of a tenant category, `None` when the category's export is
    /// not configured
    pub fn for_category(category: TenantCategory, config: &ServiceConfiguration) -> Option<Self> {
        let exports = &config.service.api_exports;
        match category {
            TenantCategory::CamelK => Some(Self {
                default_platform: exports.camel_k.on_api_binding.create_default_platform.clone(),
                default_placement: exports.camel_k.on_api_binding.create_default_placement.clone(),
                auxiliary: None,
            }),
            TenantCategory::Kaoto => exports.kaoto.as_ref().map(|kaoto| Self {
                default_platform: None,
                default_placement: kaoto.on_api_binding.create_default_placement.clone(),
                auxiliary: Some(AuxiliaryBundle {
                    namespace: KAOTO_NAMESPACE.to_string(),
                    catalog_namespace: config.service.defaults.operator_namespace.clone(),
                }),
            }),
        }
    }
}

/// The Kaoto application installed into bound workspaces
#[derive(Clone, Debug, PartialEq)]
pub struct AuxiliaryBundle {
    /// Namespace the application runs in
    pub namespace: String,
    /// Namespace the backend reads the Kamelet catalog from
    pub catalog_namespace: String,
}

/// A catalog object, applied with server-side apply
#[derive(Clone, Debug, PartialEq)]
pub enum Manifest {
    ServiceAccount(ServiceAccount),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    Deployment(Deployment),
    Service(Service),
    Ingress(Ingress),
}

impl Manifest {
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::ServiceAccount(_) => "ServiceAccount",
            Manifest::ClusterRole(_) => "ClusterRole",
            Manifest::ClusterRoleBinding(_) => "ClusterRoleBinding",
            Manifest::Deployment(_) => "Deployment",
            Manifest::Service(_) => "Service",
            Manifest::Ingress(_) => "Ingress",
        }
    }

    pub fn name(&self) -> &str {
        let meta = match self {
            Manifest::ServiceAccount(obj) => &obj.metadata,
            Manifest::ClusterRole(obj) => &obj.metadata,
            Manifest::ClusterRoleBinding(obj) => &obj.metadata,
            Manifest::Deployment(obj) => &obj.metadata,
            Manifest::Service(obj) => &obj.metadata,
            Manifest::Ingress(obj) => &obj.metadata,
        };
        meta.name.as_deref().unwrap_or_default()
    }
}

impl AuxiliaryBundle {
    /// Catalog in apply order: identity, role, role binding, deployments,
    /// services, ingress. Only the ingress path depends on the cluster, so
    /// every tenant gets the same backends behind its own URL prefix.
    pub fn manifests(&self, cluster: &LogicalCluster) -> Vec<Manifest> {
        vec![
            Manifest::ServiceAccount(self.service_account()),
            Manifest::ClusterRole(self.cluster_role()),
            Manifest::ClusterRoleBinding(self.cluster_role_binding()),
            Manifest::Deployment(self.ui_deployment()),
            Manifest::Deployment(self.backend_deployment()),
            Manifest::Service(self.service("kaoto-ui", "kaoto-ui", 80)),
            Manifest::Service(self.service("kaoto-backend-svc", "kaoto-backend", 8081)),
            Manifest::Ingress(self.ingress(cluster)),
        ]
    }

    fn metadata(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        }
    }

    fn service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: self.metadata("kaoto"),
            ..Default::default()
        }
    }

    fn cluster_role(&self) -> ClusterRole {
        ClusterRole {
            metadata: ObjectMeta {
                name: Some("kaoto".to_string()),
                ..Default::default()
            },
            rules: Some(vec![
                PolicyRule {
                    api_groups: Some(vec![CAMEL_GROUP.to_string()]),
                    resources: Some(strings(&["integrations", "kameletbindings", "kamelets"])),
                    verbs: strings(&["create", "get", "list", "patch", "update", "watch"]),
                    ..Default::default()
                },
                PolicyRule {
                    api_groups: Some(vec![String::new()]),
                    resources: Some(strings(&["pods"])),
                    verbs: strings(&["get", "list", "watch"]),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }
    }

    fn cluster_role_binding(&self) -> ClusterRoleBinding {
        ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some("kaoto".to_string()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: "kaoto".to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: "kaoto".to_string(),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            }]),
        }
    }

    fn ui_deployment(&self) -> Deployment {
        self.deployment("kaoto-ui", container("kaoto-ui", KAOTO_UI_IMAGE, 8080), None)
    }

    fn backend_deployment(&self) -> Deployment {
        let mut backend = container("kaoto-backend", KAOTO_BACKEND_IMAGE, 8081);
        backend.env = Some(vec![EnvVar {
            name: "CATALOG_NAMESPACE".to_string(),
            value: Some(self.catalog_namespace.clone()),
            ..Default::default()
        }]);
        self.deployment("kaoto-backend", backend, Some("kaoto"))
    }

    fn deployment(&self, app: &str, container: Container, service_account: Option<&str>) -> Deployment {
        let labels = app_labels(app);
        Deployment {
            metadata: self.metadata(app),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        restart_policy: Some("Always".to_string()),
                        service_account_name: service_account.map(str::to_string),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service(&self, name: &str, app: &str, port: i32) -> Service {
        Service {
            metadata: self.metadata(name),
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    protocol: Some("TCP".to_string()),
                    port,
                    target_port: Some(IntOrString::String("http".to_string())),
                    ..Default::default()
                }]),
                selector: Some(app_labels(app)),
                session_affinity: Some("None".to_string()),
                publish_not_ready_addresses: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn ingress(&self, cluster: &LogicalCluster) -> Ingress {
        let mut metadata = self.metadata("kaoto");
        metadata.annotations = Some(BTreeMap::from([
            ("nginx.ingress.kubernetes.io/use-regex".to_string(), "true".to_string()),
            ("nginx.ingress.kubernetes.io/rewrite-target".to_string(), "/$2".to_string()),
        ]));

        Ingress {
            metadata,
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some(format!("/{}/kaoto(/|$)(.*)", cluster)),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: "kaoto-ui".to_string(),
                                    port: Some(ServiceBackendPort {
                                        name: Some("http".to_string()),
                                        number: None,
                                    }),
                                }),
                                resource: None,
                            },
                        }],
                    }),
                    host: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn container(name: &str, image: &str, port: i32) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        termination_message_policy: Some("File".to_string()),
        termination_message_path: Some("/dev/termination-log".to_string()),
        ..Default::default()
    }
}

fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kaoto() -> AuxiliaryBundle {
        AuxiliaryBundle {
            namespace: KAOTO_NAMESPACE.to_string(),
            catalog_namespace: "camel-k".to_string(),
        }
    }

    #[test]
    fn test_catalog_order() {
        let manifests = kaoto().manifests(&LogicalCluster::new("acme").unwrap());
        let kinds: Vec<_> = manifests.iter().map(|m| (m.kind(), m.name())).collect();
        assert_eq!(
            kinds,
            vec![
                ("ServiceAccount", "kaoto"),
                ("ClusterRole", "kaoto"),
                ("ClusterRoleBinding", "kaoto"),
                ("Deployment", "kaoto-ui"),
                ("Deployment", "kaoto-backend"),
                ("Service", "kaoto-ui"),
                ("Service", "kaoto-backend-svc"),
                ("Ingress", "kaoto"),
            ]
        );
    }

    #[test]
    fn test_ingress_path_is_per_tenant() {
        let bundle = kaoto();
        let acme = bundle.manifests(&LogicalCluster::new("acme").unwrap());
        let globex = bundle.manifests(&LogicalCluster::new("globex").unwrap());

        let path = |manifests: &[Manifest]| match manifests.last() {
            Some(Manifest::Ingress(ingress)) => ingress.spec.as_ref().unwrap().rules.as_ref().unwrap()[0]
                .http
                .as_ref()
                .unwrap()
                .paths[0]
                .path
                .clone(),
            _ => None,
        };
        assert_eq!(path(&acme).as_deref(), Some("/acme/kaoto(/|$)(.*)"));
        assert_eq!(path(&globex).as_deref(), Some("/globex/kaoto(/|$)(.*)"));

        // Everything but the ingress is identical across tenants
        assert_eq!(acme[..7], globex[..7]);
    }

    #[test]
    fn test_backend_reads_catalog_namespace() {
        let manifests = kaoto().manifests(&LogicalCluster::new("acme").unwrap());
        let Manifest::Deployment(backend) = &manifests[4] else {
            panic!("expected the backend deployment");
        };
        let pod = backend.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("kaoto"));
        let env = pod.containers[0].env.as_ref().unwrap();
        assert_eq!(env[0].name, "CATALOG_NAMESPACE");
        assert_eq!(env[0].value.as_deref(), Some("camel-k"));
    }

    #[test]
    fn test_bundle_per_category() {
        let mut config = ServiceConfiguration::default();
        config.service.api_exports.camel_k.on_api_binding.create_default_platform =
            Some(PlatformTemplate::default());

        let camel_k = ProvisioningBundle::for_category(TenantCategory::CamelK, &config).unwrap();
        assert!(camel_k.default_platform.is_some());
        assert!(camel_k.auxiliary.is_none());
        assert!(ProvisioningBundle::for_category(TenantCategory::Kaoto, &config).is_none());

        config.service.api_exports.kaoto = Some(Default::default());
        let kaoto = ProvisioningBundle::for_category(TenantCategory::Kaoto, &config).unwrap();
        assert!(kaoto.default_platform.is_none());
        assert_eq!(kaoto.auxiliary.unwrap().catalog_namespace, "camel-k");
    }
}
