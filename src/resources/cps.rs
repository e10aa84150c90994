//! etcd configuration property store (CPS)
//!
//! The CPS is a StatefulSet of etcd members behind a headless service for
//! peer discovery, plus a node-port service that Galasa frameworks outside
//! the cluster use as their `framework.config.store`.

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ExecAction, Lifecycle, LifecycleHandler, PersistentVolumeClaim, PodSpec,
    PodTemplateSpec, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::{
    app_labels, claim_spec, container_port, env, external_service, internal_service,
    node_selector, object_meta, service_port, tcp_probe, DesiredResource, Tier,
};
use crate::crd::GalasaEcosystem;

/// etcd client port
pub const CLIENT_PORT: i32 = 2379;
/// etcd peer port
pub const PEER_PORT: i32 = 2380;
/// Name of the client port on the external service
pub const CLIENT_PORT_NAME: &str = "etcd-client";

const DEFAULT_IMAGE: &str = "quay.io/coreos/etcd";
const DEFAULT_VERSION: &str = "v3.4.3";
const DATA_VOLUME: &str = "cps-datadir";
const DATA_PATH: &str = "/var/run/etcd";

const START_SCRIPT: &str = include_str!("scripts/etcd-start.sh");
const PRESTOP_SCRIPT: &str = include_str!("scripts/etcd-prestop.sh");

/// All objects for the property store tier
pub fn generate(ecosystem: &GalasaEcosystem) -> Vec<DesiredResource> {
    vec![
        DesiredResource::Service(peer_service(ecosystem)),
        DesiredResource::Service(external_service(
            ecosystem,
            Tier::Cps,
            vec![service_port(CLIENT_PORT_NAME, CLIENT_PORT)],
        )),
        DesiredResource::StatefulSet(stateful_set(ecosystem)),
    ]
}

/// Headless service giving each member a stable DNS name
fn peer_service(ecosystem: &GalasaEcosystem) -> k8s_openapi::api::core::v1::Service {
    let mut svc = internal_service(
        ecosystem,
        Tier::Cps,
        vec![
            service_port(CLIENT_PORT_NAME, CLIENT_PORT),
            service_port("etcd-peer", PEER_PORT),
        ],
    );
    svc.metadata.annotations = Some(
        [(
            "service.alpha.kubernetes.io/tolerate-unready-endpoints".to_string(),
            "true".to_string(),
        )]
        .into(),
    );
    if let Some(spec) = svc.spec.as_mut() {
        spec.cluster_ip = Some("None".to_string());
        spec.publish_not_ready_addresses = Some(true);
    }
    svc
}

fn stateful_set(ecosystem: &GalasaEcosystem) -> StatefulSet {
    let eco = ecosystem.name_any();
    let app = Tier::Cps.workload_name(&eco);
    let peer_service = Tier::Cps.internal_service(&eco);
    let cps = &ecosystem.spec.propertystore;

    let container = Container {
        name: "etcd".to_string(),
        image: Some(cps.image.resolve(DEFAULT_IMAGE, DEFAULT_VERSION)),
        image_pull_policy: Some(ecosystem.spec.image_pull_policy.clone()),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-ec".to_string(),
            START_SCRIPT.to_string(),
        ]),
        ports: Some(vec![
            container_port("client", CLIENT_PORT),
            container_port("peer", PEER_PORT),
        ]),
        env: Some(vec![
            env("INITIAL_CLUSTER_SIZE", cps.cluster_size.to_string()),
            env("SET_NAME", app.clone()),
            env("SERVICE", peer_service.clone()),
            env("ETCDCTL_API", "3"),
        ]),
        liveness_probe: Some(tcp_probe(CLIENT_PORT, 60, 60)),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-ec".to_string(),
                        PRESTOP_SCRIPT.to_string(),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_PATH.to_string(),
            ..Default::default()
        }]),
        resources: cps.resources.clone(),
        ..Default::default()
    };

    StatefulSet {
        metadata: object_meta(ecosystem, app.clone(), &app),
        spec: Some(StatefulSetSpec {
            replicas: Some(cps.cluster_size),
            service_name: peer_service.into(),
            selector: LabelSelector {
                match_labels: Some(app_labels(&app)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(app.clone()),
                    labels: Some(app_labels(&app)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: node_selector(&cps.node_selector),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(DATA_VOLUME.to_string()),
                    labels: Some(app_labels(&app)),
                    ..Default::default()
                },
                spec: Some(claim_spec(
                    &cps.storage,
                    ecosystem.spec.storage_class_name.as_ref(),
                )),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
