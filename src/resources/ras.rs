//! CouchDB result archive store (RAS)

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PodSpec, PodTemplateSpec, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::{
    app_labels, claim_spec, container_port, external_service, http_probe, internal_service,
    node_selector, object_meta, service_port, DesiredResource, Tier,
};
use crate::crd::GalasaEcosystem;

/// CouchDB HTTP port
pub const COUCHDB_PORT: i32 = 5984;
/// Name of the CouchDB port on both services
pub const COUCHDB_PORT_NAME: &str = "couchdbport";

const DEFAULT_IMAGE: &str = "couchdb";
const DEFAULT_VERSION: &str = "2.3.1";
const DATA_VOLUME: &str = "data-disk";

/// All objects for the result archive tier
pub fn generate(ecosystem: &GalasaEcosystem) -> Vec<DesiredResource> {
    let ports = || vec![service_port(COUCHDB_PORT_NAME, COUCHDB_PORT)];
    vec![
        DesiredResource::Service(internal_service(ecosystem, Tier::Ras, ports())),
        DesiredResource::Service(external_service(ecosystem, Tier::Ras, ports())),
        DesiredResource::StatefulSet(stateful_set(ecosystem)),
    ]
}

fn stateful_set(ecosystem: &GalasaEcosystem) -> StatefulSet {
    let eco = ecosystem.name_any();
    let app = Tier::Ras.workload_name(&eco);
    let ras = &ecosystem.spec.ras_spec;

    let container = Container {
        name: "couchdb".to_string(),
        image: Some(ras.image.resolve(DEFAULT_IMAGE, DEFAULT_VERSION)),
        image_pull_policy: Some(ecosystem.spec.image_pull_policy.clone()),
        ports: Some(vec![container_port(COUCHDB_PORT_NAME, COUCHDB_PORT)]),
        liveness_probe: Some(http_probe("/", COUCHDB_PORT, 60, 60)),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: "/opt/couchdb/data".to_string(),
            ..Default::default()
        }]),
        resources: ras.resources.clone(),
        ..Default::default()
    };

    StatefulSet {
        metadata: object_meta(ecosystem, app.clone(), &app),
        spec: Some(StatefulSetSpec {
            replicas: Some(ras.replicas),
            service_name: Tier::Ras.internal_service(&eco).into(),
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
                    node_selector: node_selector(&ras.node_selector),
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
                    &ras.storage,
                    ecosystem.spec.storage_class_name.as_ref(),
                )),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
