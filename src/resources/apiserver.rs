//! Galasa API server
//!
//! The API server reads its bootstrap from a mounted ConfigMap that points
//! at the CPS node port, so this generator needs the CPS endpoint that the
//! sequencer observed after the CPS tier came up.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::{
    app_labels, config_map, container_port, external_service, http_probe, ingress,
    internal_service, node_selector, object_meta, service_port, tier_pvc, DesiredResource, Tier,
};
use crate::crd::GalasaEcosystem;

/// API server HTTP port
pub const HTTP_PORT: i32 = 8080;
/// Name of the HTTP port on the external service
pub const HTTP_PORT_NAME: &str = "http";
/// Prometheus metrics port shared by every Galasa server
pub const METRICS_PORT: i32 = 9010;
/// Health port shared by every Galasa server
pub const HEALTH_PORT: i32 = 9011;

const BOOTSTRAP_KEY: &str = "bootstrap.properties";
const TESTCATALOG_KEY: &str = "dev.galasa.testcatalog.cfg";
const TESTCATALOG_DIR: &str = "/galasa/testcatalog";

/// Contents of `bootstrap.properties` for a CPS reachable at `cps_endpoint`
///
/// `cps_endpoint` is `<externalHostname>:<node port>`. The worker image parses
/// this file, so the layout must not change.
pub fn bootstrap_properties(cps_endpoint: &str) -> String {
    format!(
        "framework.config.store=etcd:{cps_endpoint}\nframework.extra.bundles=dev.galasa.cps.etcd,dev.galasa.ras.couchdb\n"
    )
}

/// Name of the bootstrap ConfigMap
pub fn bootstrap_config_name(ecosystem: &str) -> String {
    format!("{ecosystem}-bootstrap-file")
}

fn testcatalog_config_name(ecosystem: &str) -> String {
    format!("{ecosystem}-testcatalog-file")
}

/// All objects for the API server tier
pub fn generate(ecosystem: &GalasaEcosystem, cps_endpoint: &str) -> Vec<DesiredResource> {
    let eco = ecosystem.name_any();

    let mut resources = vec![
        DesiredResource::Service(internal_service(
            ecosystem,
            Tier::ApiServer,
            vec![
                service_port(HTTP_PORT_NAME, HTTP_PORT),
                service_port("metrics", METRICS_PORT),
                service_port("health", HEALTH_PORT),
            ],
        )),
        DesiredResource::Service(external_service(
            ecosystem,
            Tier::ApiServer,
            vec![service_port(HTTP_PORT_NAME, HTTP_PORT)],
        )),
        DesiredResource::ConfigMap(config_map(
            ecosystem,
            "bootstrap-file",
            Tier::ApiServer,
            BTreeMap::from([(
                BOOTSTRAP_KEY.to_string(),
                bootstrap_properties(cps_endpoint),
            )]),
        )),
        DesiredResource::ConfigMap(config_map(
            ecosystem,
            "testcatalog-file",
            Tier::ApiServer,
            BTreeMap::from([(
                TESTCATALOG_KEY.to_string(),
                format!("framework.testcatalog.directory=file:{TESTCATALOG_DIR}"),
            )]),
        )),
        DesiredResource::PersistentVolumeClaim(tier_pvc(
            ecosystem,
            Tier::ApiServer,
            &ecosystem.spec.apiserver.storage,
        )),
        DesiredResource::Deployment(server_deployment(ecosystem)),
    ];

    if let Some(ing) = ingress(
        ecosystem,
        Tier::ApiServer,
        &["/bootstrap", "/testcatalog"],
        &Tier::ApiServer.external_service(&eco),
        HTTP_PORT,
    ) {
        resources.push(DesiredResource::Ingress(ing));
    }

    resources
}

fn server_deployment(ecosystem: &GalasaEcosystem) -> Deployment {
    let eco = ecosystem.name_any();
    let app = Tier::ApiServer.workload_name(&eco);
    let api = &ecosystem.spec.apiserver;

    let init = Container {
        name: "init-chown-data".to_string(),
        image: Some(ecosystem.spec.busybox_image.clone()),
        image_pull_policy: Some(ecosystem.spec.image_pull_policy.clone()),
        command: Some(vec![
            "chown".to_string(),
            "-R".to_string(),
            "1000".to_string(),
            "/data".to_string(),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "data".to_string(),
            mount_path: "/data".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let server = Container {
        name: "apiserver".to_string(),
        image: Some(ecosystem.spec.boot_image()),
        image_pull_policy: Some(ecosystem.spec.image_pull_policy.clone()),
        command: Some(vec!["java".to_string()]),
        args: Some(
            [
                "-jar",
                "boot.jar",
                "--obr",
                "file:galasa.obr",
                "--trace",
                "--api",
                "--bootstrap",
                "file:/bootstrap.properties",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ),
        ports: Some(vec![
            container_port("metrics", METRICS_PORT),
            container_port("health", HEALTH_PORT),
            container_port(HTTP_PORT_NAME, HTTP_PORT),
        ]),
        liveness_probe: Some(http_probe("/health", HTTP_PORT, 60, 60)),
        readiness_probe: Some(http_probe("/health", HTTP_PORT, 3, 1)),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "bootstrap".to_string(),
                mount_path: format!("/{BOOTSTRAP_KEY}"),
                sub_path: Some(BOOTSTRAP_KEY.to_string()),
                ..Default::default()
            },
            VolumeMount {
                name: "testcatalog".to_string(),
                mount_path: format!("/galasa/load/{TESTCATALOG_KEY}"),
                sub_path: Some(TESTCATALOG_KEY.to_string()),
                ..Default::default()
            },
            VolumeMount {
                name: "data".to_string(),
                mount_path: TESTCATALOG_DIR.to_string(),
                ..Default::default()
            },
        ]),
        resources: api.resources.clone(),
        ..Default::default()
    };

    let volumes = vec![
        Volume {
            name: "bootstrap".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: bootstrap_config_name(&eco).into(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "testcatalog".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: testcatalog_config_name(&eco).into(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "data".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: Tier::ApiServer.pvc_name(&eco),
                read_only: Some(false),
            }),
            ..Default::default()
        },
    ];

    Deployment {
        metadata: object_meta(ecosystem, app.clone(), &app),
        spec: Some(DeploymentSpec {
            replicas: Some(api.replicas),
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
                    init_containers: Some(vec![init]),
                    containers: vec![server],
                    volumes: Some(volumes),
                    node_selector: node_selector(&api.node_selector),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
