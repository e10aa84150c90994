//! Engine controller and resource monitor
//!
//! Both run the Galasa boot image against the API server bootstrap; the
//! engine controller reads its settings from the `<n>-config` map.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::apiserver::{HEALTH_PORT, HTTP_PORT, METRICS_PORT};
use super::{
    app_labels, config_map, container_port, external_service, http_probe, internal_service,
    namespace_env, node_selector, object_meta, service_port, DesiredResource, Tier,
};
use crate::crd::GalasaEcosystem;

/// Service account the engine controller launches engine pods with
pub const ENGINE_SERVICE_ACCOUNT: &str = "galasa-ecosystem-kubernetes-operator";

/// Name of the engine controller settings map
pub fn settings_config_name(ecosystem: &str) -> String {
    format!("{ecosystem}-config")
}

/// Engine controller settings, with `spec.config` entries taking precedence
pub fn controller_settings(ecosystem: &GalasaEcosystem) -> BTreeMap<String, String> {
    let eco = ecosystem.name_any();
    let ctrl = &ecosystem.spec.engine_controller;
    let mut settings = BTreeMap::from([
        (
            "bootstrap".to_string(),
            format!(
                "http://{}:{HTTP_PORT}/bootstrap",
                Tier::ApiServer.external_service(&eco)
            ),
        ),
        ("max_engines".to_string(), ctrl.max_engines.to_string()),
        ("engine_label".to_string(), ctrl.engine_label.clone()),
        ("engine_image".to_string(), ecosystem.spec.boot_image()),
    ]);
    settings.extend(
        ecosystem
            .spec
            .config
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    settings
}

/// Objects for the engine controller tier
pub fn engine_controller(ecosystem: &GalasaEcosystem) -> Vec<DesiredResource> {
    let ctrl = &ecosystem.spec.engine_controller;
    let mut deployment = worker_deployment(
        ecosystem,
        Tier::EngineController,
        ctrl.replicas,
        ecosystem.spec.boot_image(),
        "--k8scontroller",
        ctrl.resources.clone(),
        &ctrl.node_selector,
    );
    if let Some(pod) = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
    {
        pod.service_account_name = Some(ENGINE_SERVICE_ACCOUNT.to_string());
    }

    vec![
        DesiredResource::ConfigMap(config_map(
            ecosystem,
            "config",
            Tier::EngineController,
            controller_settings(ecosystem),
        )),
        DesiredResource::Deployment(deployment),
        DesiredResource::Service(internal_service(
            ecosystem,
            Tier::EngineController,
            vec![
                service_port("http", HTTP_PORT),
                service_port("metrics", METRICS_PORT),
                service_port("health", HEALTH_PORT),
            ],
        )),
    ]
}

/// Objects for the resource monitor tier
pub fn resource_monitor(ecosystem: &GalasaEcosystem) -> Vec<DesiredResource> {
    let resmon = &ecosystem.spec.engine_resmon;
    let version = resmon
        .version
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(&ecosystem.spec.galasa_version);
    let image = format!("{}:{}", ecosystem.spec.boot_image_name(), version);

    let mut deployment = worker_deployment(
        ecosystem,
        Tier::ResourceMonitor,
        resmon.replicas,
        image,
        "--resourcemanagement",
        resmon.resources.clone(),
        &resmon.node_selector,
    );
    if let Some(pod) = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
    {
        for c in pod.containers.iter_mut() {
            c.image_pull_policy = Some("Always".to_string());
        }
    }

    let ports = || {
        vec![
            service_port("metrics", METRICS_PORT),
            service_port("health", HEALTH_PORT),
        ]
    };
    vec![
        DesiredResource::Service(internal_service(ecosystem, Tier::ResourceMonitor, ports())),
        DesiredResource::Service(external_service(ecosystem, Tier::ResourceMonitor, ports())),
        DesiredResource::Deployment(deployment),
    ]
}

/// Boot image server reading its bootstrap URI from the settings map
pub(crate) fn worker_deployment(
    ecosystem: &GalasaEcosystem,
    tier: Tier,
    replicas: i32,
    image: String,
    mode_flag: &str,
    resources: Option<ResourceRequirements>,
    selector: &BTreeMap<String, String>,
) -> Deployment {
    let eco = ecosystem.name_any();
    let app = tier.workload_name(&eco);

    let container = Container {
        name: app.clone(),
        image: Some(image),
        image_pull_policy: Some(ecosystem.spec.image_pull_policy.clone()),
        command: Some(vec!["java".to_string()]),
        args: Some(
            [
                "-jar",
                "boot.jar",
                "--obr",
                "file:galasa.obr",
                mode_flag,
                "--bootstrap",
                "$(BOOTSTRAP_URI)",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ),
        env: Some(vec![bootstrap_env(&eco), namespace_env("NAMESPACE")]),
        ports: Some(vec![
            container_port("metrics", METRICS_PORT),
            container_port("health", HEALTH_PORT),
        ]),
        liveness_probe: Some(http_probe("/", HEALTH_PORT, 60, 60)),
        resources,
        ..Default::default()
    };

    Deployment {
        metadata: object_meta(ecosystem, app.clone(), &app),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
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
                    node_selector: node_selector(selector),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn bootstrap_env(ecosystem: &str) -> EnvVar {
    EnvVar {
        name: "BOOTSTRAP_URI".to_string(),
        value_from: Some(EnvVarSource {
            config_map_key_ref: Some(ConfigMapKeySelector {
                name: settings_config_name(ecosystem).into(),
                key: "bootstrap".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
