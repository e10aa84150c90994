//! Desired-state generators for every ecosystem tier
//!
//! Each submodule is a pure function from a [`GalasaEcosystem`] to the list
//! of Kubernetes objects that tier needs. Nothing here talks to the API
//! server; the applier in [`crate::apply`] does that.
//!
//! Objects are wrapped in [`DesiredResource`] so the applier and the
//! ownership step can treat every kind the same way.

pub mod apiserver;
pub mod cps;
pub mod engines;
pub mod monitoring;
pub mod ras;
pub mod simbank;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Probe, Service, ServicePort, ServiceSpec,
    TCPSocketAction, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::GalasaEcosystem;

/// One tier of the ecosystem, in dependency order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    /// etcd configuration property store
    Cps,
    /// CouchDB result archive store
    Ras,
    /// Galasa API server
    ApiServer,
    /// Engine controller
    EngineController,
    /// Resource monitor
    ResourceMonitor,
    /// Simbank simulator
    Simbank,
    /// Metrics exporter
    Metrics,
    /// Prometheus
    Prometheus,
    /// Grafana
    Grafana,
}

impl Tier {
    /// Suffix of the workload name (`<ecosystem>-<suffix>`)
    pub fn workload_suffix(&self) -> &'static str {
        match self {
            Tier::Cps => "cps",
            Tier::Ras => "ras",
            Tier::ApiServer => "apiserver",
            Tier::EngineController => "engine-controller",
            Tier::ResourceMonitor => "resource-monitor",
            Tier::Simbank => "simbank",
            Tier::Metrics => "metrics",
            Tier::Prometheus => "prometheus",
            Tier::Grafana => "grafana",
        }
    }

    /// Prefix used in service names; only the API server differs
    fn service_stem(&self) -> &'static str {
        match self {
            Tier::ApiServer => "api",
            other => other.workload_suffix(),
        }
    }

    /// `<ecosystem>-<tier>`: workload name and `app` label value
    pub fn workload_name(&self, ecosystem: &str) -> String {
        format!("{}-{}", ecosystem, self.workload_suffix())
    }

    /// `<ecosystem>-<tier>-internal-service`
    pub fn internal_service(&self, ecosystem: &str) -> String {
        format!("{}-{}-internal-service", ecosystem, self.service_stem())
    }

    /// `<ecosystem>-<tier>-external-service`
    pub fn external_service(&self, ecosystem: &str) -> String {
        format!("{}-{}-external-service", ecosystem, self.service_stem())
    }

    /// `<ecosystem>-<tier>-pvc`
    pub fn pvc_name(&self, ecosystem: &str) -> String {
        format!("{}-{}-pvc", ecosystem, self.workload_suffix())
    }

    /// Label selector string matching this tier's pods
    pub fn selector(&self, ecosystem: &str) -> String {
        format!("app={}", self.workload_name(ecosystem))
    }
}

/// Kind of a generated object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// core/v1 ConfigMap
    ConfigMap,
    /// core/v1 Service
    Service,
    /// core/v1 PersistentVolumeClaim
    PersistentVolumeClaim,
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
    /// networking.k8s.io/v1 Ingress
    Ingress,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Service => "Service",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::Ingress => "Ingress",
        };
        write!(f, "{s}")
    }
}

/// A generated object the applier should make exist
#[derive(Clone, Debug, PartialEq)]
pub enum DesiredResource {
    /// Configuration file or key/value set
    ConfigMap(ConfigMap),
    /// Internal or node-port service
    Service(Service),
    /// Standalone volume claim
    PersistentVolumeClaim(PersistentVolumeClaim),
    /// Stateless workload
    Deployment(Deployment),
    /// Stateful workload
    StatefulSet(StatefulSet),
    /// HTTP ingress
    Ingress(Ingress),
}

impl DesiredResource {
    /// Kind of the wrapped object
    pub fn kind(&self) -> ResourceKind {
        match self {
            DesiredResource::ConfigMap(_) => ResourceKind::ConfigMap,
            DesiredResource::Service(_) => ResourceKind::Service,
            DesiredResource::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            DesiredResource::Deployment(_) => ResourceKind::Deployment,
            DesiredResource::StatefulSet(_) => ResourceKind::StatefulSet,
            DesiredResource::Ingress(_) => ResourceKind::Ingress,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            DesiredResource::ConfigMap(o) => &o.metadata,
            DesiredResource::Service(o) => &o.metadata,
            DesiredResource::PersistentVolumeClaim(o) => &o.metadata,
            DesiredResource::Deployment(o) => &o.metadata,
            DesiredResource::StatefulSet(o) => &o.metadata,
            DesiredResource::Ingress(o) => &o.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            DesiredResource::ConfigMap(o) => &mut o.metadata,
            DesiredResource::Service(o) => &mut o.metadata,
            DesiredResource::PersistentVolumeClaim(o) => &mut o.metadata,
            DesiredResource::Deployment(o) => &mut o.metadata,
            DesiredResource::StatefulSet(o) => &mut o.metadata,
            DesiredResource::Ingress(o) => &mut o.metadata,
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Desired replica count for workloads, `None` for everything else
    pub fn replicas(&self) -> Option<i32> {
        match self {
            DesiredResource::Deployment(d) => d.spec.as_ref().and_then(|s| s.replicas),
            DesiredResource::StatefulSet(s) => s.spec.as_ref().and_then(|s| s.replicas),
            _ => None,
        }
    }

    /// Attach a controller owner reference, replacing any previous one
    pub fn owned_by(mut self, owner: &OwnerReference) -> Self {
        let refs = self.metadata_mut().owner_references.get_or_insert_with(Vec::new);
        refs.retain(|r| r.uid != owner.uid);
        refs.push(owner.clone());
        self
    }
}

/// Controller owner reference pointing at the ecosystem
///
/// `None` when the object has not been persisted yet (no uid).
pub fn owner_reference(ecosystem: &GalasaEcosystem) -> Option<OwnerReference> {
    use kube::Resource;
    ecosystem.controller_owner_ref(&())
}

/// `app=<value>` label map
pub fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

/// Metadata in the ecosystem's namespace carrying the given `app` label
pub fn object_meta(ecosystem: &GalasaEcosystem, name: impl Into<String>, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: ecosystem.namespace(),
        labels: Some(app_labels(app)),
        ..Default::default()
    }
}

/// Config map named `<ecosystem>-<suffix>` for a tier
pub fn config_map(
    ecosystem: &GalasaEcosystem,
    suffix: &str,
    tier: Tier,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    let eco = ecosystem.name_any();
    ConfigMap {
        metadata: object_meta(ecosystem, format!("{eco}-{suffix}"), &tier.workload_name(&eco)),
        data: Some(data),
        ..Default::default()
    }
}

/// Named service port whose target is the same container port
pub fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    }
}

/// Cluster-internal service selecting a tier's pods
pub fn internal_service(
    ecosystem: &GalasaEcosystem,
    tier: Tier,
    ports: Vec<ServicePort>,
) -> Service {
    let eco = ecosystem.name_any();
    let app = tier.workload_name(&eco);
    Service {
        metadata: object_meta(ecosystem, tier.internal_service(&eco), &app),
        spec: Some(ServiceSpec {
            selector: Some(app_labels(&app)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Node-port service exposing a tier's pods outside the cluster
pub fn external_service(
    ecosystem: &GalasaEcosystem,
    tier: Tier,
    ports: Vec<ServicePort>,
) -> Service {
    let eco = ecosystem.name_any();
    let app = tier.workload_name(&eco);
    Service {
        metadata: object_meta(ecosystem, tier.external_service(&eco), &app),
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(app_labels(&app)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ReadWriteOnce claim spec of the given size
pub fn claim_spec(storage: &str, storage_class: Option<&String>) -> PersistentVolumeClaimSpec {
    PersistentVolumeClaimSpec {
        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
        storage_class_name: storage_class.cloned(),
        resources: Some(VolumeResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(storage.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Standalone `<ecosystem>-<tier>-pvc` claim
pub fn tier_pvc(ecosystem: &GalasaEcosystem, tier: Tier, storage: &str) -> PersistentVolumeClaim {
    let eco = ecosystem.name_any();
    PersistentVolumeClaim {
        metadata: object_meta(ecosystem, tier.pvc_name(&eco), &tier.workload_name(&eco)),
        spec: Some(claim_spec(
            storage,
            ecosystem.spec.storage_class_name.as_ref(),
        )),
        ..Default::default()
    }
}

/// Named container port
pub fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        ..Default::default()
    }
}

/// Plain `name=value` environment variable
pub fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Environment variable holding the pod's namespace
pub fn namespace_env(name: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.namespace".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// TCP liveness/readiness probe
pub fn tcp_probe(port: i32, initial_delay: i32, period: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

/// HTTP GET probe
pub fn http_probe(path: &str, port: i32, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

/// Node selector, omitted when empty
pub fn node_selector(selector: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!selector.is_empty()).then(|| selector.clone())
}

/// Ingress routing each path prefix to `backend_service:port`
///
/// `None` when no ingress hostname is configured.
pub fn ingress(
    ecosystem: &GalasaEcosystem,
    tier: Tier,
    paths: &[&str],
    backend_service: &str,
    port: i32,
) -> Option<Ingress> {
    ecosystem.spec.ingress_host()?;
    let eco = ecosystem.name_any();

    let http_paths = paths
        .iter()
        .map(|path| HTTPIngressPath {
            path: Some(path.to_string()),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: backend_service.to_string(),
                    port: Some(ServiceBackendPort {
                        number: Some(port),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            },
        })
        .collect();

    Some(Ingress {
        metadata: object_meta(
            ecosystem,
            format!("{}-ingress", tier.workload_name(&eco)),
            &tier.workload_name(&eco),
        ),
        spec: Some(IngressSpec {
            ingress_class_name: ecosystem
                .spec
                .ingress_class
                .clone()
                .filter(|c| !c.is_empty()),
            rules: Some(vec![IngressRule {
                http: Some(HTTPIngressRuleValue { paths: http_paths }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;

    mod naming {
        use super::*;

        /// Story: every object name is derived from the ecosystem name alone
        #[test]
        fn story_names_follow_the_fixed_suffix_pattern() {
            assert_eq!(Tier::Cps.workload_name("eco"), "eco-cps");
            assert_eq!(Tier::Cps.internal_service("eco"), "eco-cps-internal-service");
            assert_eq!(Tier::Ras.external_service("eco"), "eco-ras-external-service");
            assert_eq!(Tier::ApiServer.workload_name("eco"), "eco-apiserver");
            assert_eq!(Tier::ApiServer.internal_service("eco"), "eco-api-internal-service");
            assert_eq!(Tier::ApiServer.pvc_name("eco"), "eco-apiserver-pvc");
            assert_eq!(
                Tier::EngineController.internal_service("eco"),
                "eco-engine-controller-internal-service"
            );
            assert_eq!(Tier::Grafana.pvc_name("eco"), "eco-grafana-pvc");
        }

        #[test]
        fn test_selector_matches_app_label() {
            assert_eq!(Tier::Simbank.selector("eco"), "app=eco-simbank");
            assert_eq!(
                app_labels(&Tier::Simbank.workload_name("eco")).get("app"),
                Some(&"eco-simbank".to_string())
            );
        }
    }

    mod desired_resource {
        use super::*;
        use k8s_openapi::api::apps::v1::DeploymentSpec;

        #[test]
        fn test_only_workloads_report_replicas() {
            let deployment = DesiredResource::Deployment(Deployment {
                metadata: ObjectMeta {
                    name: Some("d".to_string()),
                    ..Default::default()
                },
                spec: Some(DeploymentSpec {
                    replicas: Some(2),
                    ..Default::default()
                }),
                ..Default::default()
            });
            assert_eq!(deployment.replicas(), Some(2));
            assert_eq!(deployment.kind(), ResourceKind::Deployment);
            assert_eq!(deployment.name(), "d");

            let cm = DesiredResource::ConfigMap(ConfigMap::default());
            assert_eq!(cm.replicas(), None);
            assert_eq!(cm.name(), "");
        }

        /// Story: children are owned by the ecosystem so deleting it cascades
        #[test]
        fn story_owner_reference_points_at_the_ecosystem() {
            let eco = sample_ecosystem();
            let owner = owner_reference(&eco).expect("ecosystem has a uid");
            assert_eq!(owner.kind, "GalasaEcosystem");
            assert_eq!(owner.name, "test-ecosystem");
            assert_eq!(owner.controller, Some(true));

            let cm = DesiredResource::ConfigMap(ConfigMap::default())
                .owned_by(&owner)
                .owned_by(&owner);
            let refs = cm.metadata().owner_references.as_ref().unwrap();
            assert_eq!(refs.len(), 1);
            assert_eq!(refs[0].uid, "0f2b4a3c-uid");
        }

        #[test]
        fn test_unsaved_ecosystem_has_no_owner_reference() {
            let mut eco = sample_ecosystem();
            eco.metadata.uid = None;
            assert!(owner_reference(&eco).is_none());
        }
    }

    mod builders {
        use super::*;

        #[test]
        fn test_external_service_is_node_port() {
            let eco = sample_ecosystem();
            let svc = external_service(&eco, Tier::Ras, vec![service_port("couchdbport", 5984)]);
            let spec = svc.spec.unwrap();
            assert_eq!(spec.type_.as_deref(), Some("NodePort"));
            assert_eq!(
                spec.selector.unwrap().get("app").map(String::as_str),
                Some("test-ecosystem-ras")
            );
        }

        #[test]
        fn test_tier_pvc_uses_storage_class_and_size() {
            let eco = sample_ecosystem();
            let pvc = tier_pvc(&eco, Tier::Prometheus, "200Mi");
            assert_eq!(pvc.metadata.name.as_deref(), Some("test-ecosystem-prometheus-pvc"));
            let spec = pvc.spec.unwrap();
            assert_eq!(spec.storage_class_name.as_deref(), Some("test-storage"));
            let requests = spec.resources.unwrap().requests.unwrap();
            assert_eq!(requests["storage"], Quantity("200Mi".to_string()));
        }

        #[test]
        fn test_no_ingress_without_hostname() {
            let eco = sample_ecosystem();
            assert!(ingress(&eco, Tier::Grafana, &["/x"], "svc", 3000).is_none());
        }

        #[test]
        fn test_empty_node_selector_is_omitted() {
            assert_eq!(node_selector(&BTreeMap::new()), None);
            let sel = BTreeMap::from([("disk".to_string(), "ssd".to_string())]);
            assert_eq!(node_selector(&sel), Some(sel.clone()));
        }
    }
}
