//! Metrics exporter, Prometheus and Grafana
//!
//! The three are applied together as one tier. Prometheus scrapes the
//! metrics port of the engine controller, resource monitor and metrics
//! services; Grafana is served from the `/<ecosystem>-grafana` sub-path.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::apiserver::{HEALTH_PORT, METRICS_PORT};
use super::engines::worker_deployment;
use super::{
    app_labels, config_map, container_port, external_service, ingress, internal_service,
    node_selector, object_meta, service_port, tier_pvc, DesiredResource, Tier,
};
use crate::crd::GalasaEcosystem;

/// Prometheus HTTP port
pub const PROMETHEUS_PORT: i32 = 9090;
/// Grafana HTTP port
pub const GRAFANA_PORT: i32 = 3000;
/// Name of the Grafana port on the external service
pub const GRAFANA_PORT_NAME: &str = "grafana-external";

const PROMETHEUS_IMAGE: &str = "prom/prometheus";
const PROMETHEUS_VERSION: &str = "v2.10.0";
const GRAFANA_IMAGE: &str = "grafana/grafana";
const GRAFANA_VERSION: &str = "6.2.4";

const DASHBOARD_JSON: &str = include_str!("assets/grafana-dashboard.json");

/// Path Grafana is served from, both behind the ingress and on the node port
pub fn grafana_path(ecosystem: &str) -> String {
    format!("/{ecosystem}-grafana")
}

/// All objects for the monitoring tier
pub fn generate(ecosystem: &GalasaEcosystem) -> Vec<DesiredResource> {
    let mut resources = metrics(ecosystem);
    resources.extend(prometheus(ecosystem));
    resources.extend(grafana(ecosystem));
    resources
}

/// Galasa metrics exporter
pub fn metrics(ecosystem: &GalasaEcosystem) -> Vec<DesiredResource> {
    let mon = &ecosystem.spec.monitoring;
    let image = mon.metrics_image.resolve(
        &ecosystem.spec.boot_image_name(),
        &ecosystem.spec.galasa_version,
    );

    vec![
        DesiredResource::Service(internal_service(
            ecosystem,
            Tier::Metrics,
            vec![
                service_port("metrics", METRICS_PORT),
                service_port("health", HEALTH_PORT),
            ],
        )),
        DesiredResource::Service(external_service(
            ecosystem,
            Tier::Metrics,
            vec![service_port("metrics", METRICS_PORT)],
        )),
        DesiredResource::Deployment(worker_deployment(
            ecosystem,
            Tier::Metrics,
            mon.metrics_replicas,
            image,
            "--metricserver",
            None,
            &mon.node_selector,
        )),
    ]
}

/// Scrape configuration for the ecosystem's Galasa services
pub fn prometheus_config(ecosystem: &str) -> String {
    let mut yml = String::from(
        "global:\n  scrape_interval: 15s\n  evaluation_interval: 15s\nscrape_configs:\n",
    );
    for tier in [Tier::ResourceMonitor, Tier::EngineController, Tier::Metrics] {
        let job = tier.workload_suffix();
        yml.push_str(&format!(
            "  - job_name: '{job}'\n    scrape_interval: 5s\n    static_configs:\n      - targets: ['{}:{METRICS_PORT}']\n        labels:\n          groups: 'test'\n",
            tier.internal_service(ecosystem)
        ));
    }
    yml
}

/// Prometheus server
pub fn prometheus(ecosystem: &GalasaEcosystem) -> Vec<DesiredResource> {
    let eco = ecosystem.name_any();
    let mon = &ecosystem.spec.monitoring;
    let app = Tier::Prometheus.workload_name(&eco);

    let init = chown_init(ecosystem, "65534:65534", "/data");
    let server = Container {
        name: "prometheus".to_string(),
        image: Some(
            mon.prometheus_image
                .resolve(PROMETHEUS_IMAGE, PROMETHEUS_VERSION),
        ),
        image_pull_policy: Some(ecosystem.spec.image_pull_policy.clone()),
        args: Some(vec![
            "--config.file=/etc/prometheus/prometheus.yml".to_string(),
            "--storage.tsdb.path=/prometheus".to_string(),
            format!(
                "--web.external-url={}:{PROMETHEUS_PORT}/galasa-prometheus",
                ecosystem.spec.external_base()
            ),
            "--web.route-prefix=/".to_string(),
        ]),
        ports: Some(vec![container_port("prometheus-port", PROMETHEUS_PORT)]),
        volume_mounts: Some(vec![
            mount("prometheus-config", "/etc/prometheus", None),
            mount("datadir", "/prometheus", None),
        ]),
        ..Default::default()
    };

    let volumes = vec![
        config_volume("prometheus-config", format!("{eco}-prometheus-config")),
        claim_volume("datadir", Tier::Prometheus.pvc_name(&eco)),
    ];

    vec![
        DesiredResource::ConfigMap(config_map(
            ecosystem,
            "prometheus-config",
            Tier::Prometheus,
            BTreeMap::from([("prometheus.yml".to_string(), prometheus_config(&eco))]),
        )),
        DesiredResource::PersistentVolumeClaim(tier_pvc(
            ecosystem,
            Tier::Prometheus,
            &mon.prometheus_storage,
        )),
        DesiredResource::Service(internal_service(
            ecosystem,
            Tier::Prometheus,
            vec![service_port("prometheus", PROMETHEUS_PORT)],
        )),
        DesiredResource::Service(external_service(
            ecosystem,
            Tier::Prometheus,
            vec![service_port("prometheus-external", PROMETHEUS_PORT)],
        )),
        DesiredResource::Deployment(monitoring_deployment(
            ecosystem,
            &app,
            mon.prometheus_replicas,
            init,
            server,
            volumes,
        )),
    ]
}

fn grafana_ini(ecosystem: &str) -> String {
    format!(
        "[server]\nroot_url = %(protocol)s://%(domain)s:%(http_port)s{}/\nserve_from_sub_path = true\n\n[auth.anonymous]\nenabled = true\n",
        grafana_path(ecosystem)
    )
}

fn grafana_datasource(ecosystem: &str) -> String {
    format!(
        "apiVersion: 1\ndatasources:\n  - name: Prometheus\n    type: prometheus\n    access: proxy\n    url: http://{}:{PROMETHEUS_PORT}\n    isDefault: true\n",
        Tier::Prometheus.internal_service(ecosystem)
    )
}

const DASHBOARD_PROVIDER: &str = "apiVersion: 1\nproviders:\n  - name: 'galasa'\n    orgId: 1\n    folder: ''\n    type: file\n    disableDeletion: false\n    options:\n      path: /etc/grafana/dashboards\n";

/// Grafana with a provisioned Prometheus datasource and the Galasa dashboard
pub fn grafana(ecosystem: &GalasaEcosystem) -> Vec<DesiredResource> {
    let eco = ecosystem.name_any();
    let mon = &ecosystem.spec.monitoring;
    let app = Tier::Grafana.workload_name(&eco);

    let init = chown_init(ecosystem, "472:472", "/var/lib/grafana");
    let server = Container {
        name: "grafana".to_string(),
        image: Some(mon.grafana_image.resolve(GRAFANA_IMAGE, GRAFANA_VERSION)),
        image_pull_policy: Some(ecosystem.spec.image_pull_policy.clone()),
        ports: Some(vec![container_port("grafana-port", GRAFANA_PORT)]),
        volume_mounts: Some(vec![
            mount("grafana-config", "/etc/grafana/grafana.ini", Some("grafana.ini")),
            mount("grafana-provisioning", "/etc/grafana/provisioning/datasources", None),
            mount("grafana-dashboard", "/etc/grafana/provisioning/dashboards", None),
            mount("grafana-auto-dashboard", "/etc/grafana/dashboards", None),
            mount("datadir", "/var/lib/grafana", None),
        ]),
        ..Default::default()
    };

    let volumes = vec![
        config_volume("grafana-config", format!("{eco}-grafana-config")),
        config_volume("grafana-provisioning", format!("{eco}-grafana-provisioning")),
        config_volume("grafana-dashboard", format!("{eco}-grafana-dashboard")),
        config_volume("grafana-auto-dashboard", format!("{eco}-grafana-auto-dashboard")),
        claim_volume("datadir", Tier::Grafana.pvc_name(&eco)),
    ];

    let file = |key: &str, value: String| BTreeMap::from([(key.to_string(), value)]);

    let mut resources = vec![
        DesiredResource::ConfigMap(config_map(
            ecosystem,
            "grafana-config",
            Tier::Grafana,
            file("grafana.ini", grafana_ini(&eco)),
        )),
        DesiredResource::ConfigMap(config_map(
            ecosystem,
            "grafana-provisioning",
            Tier::Grafana,
            file("prometheus.yaml", grafana_datasource(&eco)),
        )),
        DesiredResource::ConfigMap(config_map(
            ecosystem,
            "grafana-dashboard",
            Tier::Grafana,
            file("dashboards.yaml", DASHBOARD_PROVIDER.to_string()),
        )),
        DesiredResource::ConfigMap(config_map(
            ecosystem,
            "grafana-auto-dashboard",
            Tier::Grafana,
            file("dashboard.json", DASHBOARD_JSON.to_string()),
        )),
        DesiredResource::PersistentVolumeClaim(tier_pvc(
            ecosystem,
            Tier::Grafana,
            &mon.grafana_storage,
        )),
        DesiredResource::Service(internal_service(
            ecosystem,
            Tier::Grafana,
            vec![service_port("grafana", GRAFANA_PORT)],
        )),
        DesiredResource::Service(external_service(
            ecosystem,
            Tier::Grafana,
            vec![service_port(GRAFANA_PORT_NAME, GRAFANA_PORT)],
        )),
        DesiredResource::Deployment(monitoring_deployment(
            ecosystem,
            &app,
            mon.grafana_replicas,
            init,
            server,
            volumes,
        )),
    ];

    if let Some(ing) = ingress(
        ecosystem,
        Tier::Grafana,
        &[grafana_path(&eco).as_str()],
        &Tier::Grafana.external_service(&eco),
        GRAFANA_PORT,
    ) {
        resources.push(DesiredResource::Ingress(ing));
    }

    resources
}

fn chown_init(ecosystem: &GalasaEcosystem, owner: &str, path: &str) -> Container {
    Container {
        name: "init-chown-data".to_string(),
        image: Some(ecosystem.spec.busybox_image.clone()),
        image_pull_policy: Some(ecosystem.spec.image_pull_policy.clone()),
        command: Some(vec![
            "chown".to_string(),
            "-R".to_string(),
            owner.to_string(),
            path.to_string(),
        ]),
        volume_mounts: Some(vec![mount("datadir", path, None)]),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        sub_path: sub_path.map(str::to_string),
        ..Default::default()
    }
}

fn config_volume(name: &str, config_map: String) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn claim_volume(name: &str, claim: String) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim,
            read_only: Some(false),
        }),
        ..Default::default()
    }
}

fn monitoring_deployment(
    ecosystem: &GalasaEcosystem,
    app: &str,
    replicas: i32,
    init: Container,
    server: Container,
    volumes: Vec<Volume>,
) -> Deployment {
    Deployment {
        metadata: object_meta(ecosystem, app, app),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(app_labels(app)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(app.to_string()),
                    labels: Some(app_labels(app)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(vec![init]),
                    containers: vec![server],
                    volumes: Some(volumes),
                    node_selector: node_selector(&ecosystem.spec.monitoring.node_selector),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_fixtures::{self, *};

    mod metrics_server {
        use super::*;

        #[test]
        fn test_metrics_image_defaults_to_boot_image() {
            let resources = metrics(&sample_ecosystem());
            let d = deployment(&resources, "test-ecosystem-metrics");
            let c = &d.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
            assert_eq!(
                c.image.as_deref(),
                Some("docker.galasa.dev/galasa-boot-embedded-amd64:0.30.0")
            );
            assert!(c.args.as_ref().unwrap().contains(&"--metricserver".to_string()));
            assert_eq!(
                port_names(service(&resources, "test-ecosystem-metrics-external-service")),
                vec![("metrics".to_string(), 9010)]
            );
        }
    }

    mod prometheus_server {
        use super::*;

        /// Story: Prometheus scrapes every Galasa service of its own ecosystem
        #[test]
        fn story_scrape_config_targets_internal_services() {
            let yml = prometheus_config("test-ecosystem");
            assert!(yml.starts_with("global:\n  scrape_interval: 15s\n"));
            for target in [
                "test-ecosystem-resource-monitor-internal-service:9010",
                "test-ecosystem-engine-controller-internal-service:9010",
                "test-ecosystem-metrics-internal-service:9010",
            ] {
                assert!(yml.contains(target), "missing {target}");
            }
            let parsed: serde_yaml::Value = serde_yaml::from_str(&yml).unwrap();
            assert_eq!(parsed["scrape_configs"].as_sequence().unwrap().len(), 3);
            assert_eq!(parsed["scrape_configs"][2]["job_name"], "metrics");
        }

        #[test]
        fn test_deployment_args_and_volumes() {
            let resources = prometheus(&sample_ecosystem());
            let d = deployment(&resources, "test-ecosystem-prometheus");
            let pod = d.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
            let init = &pod.init_containers.as_ref().unwrap()[0];
            assert_eq!(init.command.as_ref().unwrap()[2], "65534:65534");

            let c = &pod.containers[0];
            assert_eq!(c.image.as_deref(), Some("prom/prometheus:v2.10.0"));
            assert!(c.args.as_ref().unwrap().contains(
                &"--web.external-url=http://galasa.example.com:9090/galasa-prometheus".to_string()
            ));
            let claim = pod
                .volumes
                .as_ref()
                .unwrap()
                .iter()
                .find_map(|v| v.persistent_volume_claim.as_ref())
                .unwrap();
            assert_eq!(claim.claim_name, "test-ecosystem-prometheus-pvc");
        }
    }

    mod grafana_server {
        use super::*;

        #[test]
        fn test_config_maps_carry_their_files() {
            let resources = grafana(&sample_ecosystem());
            for (name, key) in [
                ("test-ecosystem-grafana-config", "grafana.ini"),
                ("test-ecosystem-grafana-provisioning", "prometheus.yaml"),
                ("test-ecosystem-grafana-dashboard", "dashboards.yaml"),
                ("test-ecosystem-grafana-auto-dashboard", "dashboard.json"),
            ] {
                let cm = test_fixtures::config_map(&resources, name);
                assert!(
                    !cm.data.as_ref().unwrap()[key].is_empty(),
                    "{name} has empty {key}"
                );
            }
        }

        #[test]
        fn test_bundled_dashboard_is_valid_json() {
            let dashboard: serde_json::Value = serde_json::from_str(DASHBOARD_JSON).unwrap();
            assert_eq!(dashboard["title"], "Galasa Ecosystem");
        }

        #[test]
        fn test_grafana_served_from_sub_path() {
            assert!(grafana_ini("test-ecosystem").contains("/test-ecosystem-grafana/"));
            assert!(grafana_datasource("test-ecosystem")
                .contains("http://test-ecosystem-prometheus-internal-service:9090"));
        }

        #[test]
        fn test_deployment_chowns_data_dir() {
            let resources = grafana(&sample_ecosystem());
            let d = deployment(&resources, "test-ecosystem-grafana");
            let pod = d.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
            let init = &pod.init_containers.as_ref().unwrap()[0];
            assert_eq!(
                init.volume_mounts.as_ref().unwrap()[0].mount_path,
                "/var/lib/grafana"
            );
            assert_eq!(
                pod.containers[0].ports.as_ref().unwrap()[0].container_port,
                3000
            );
            assert_eq!(pod.volumes.as_ref().unwrap().len(), 5);
            assert_eq!(
                port_names(service(&resources, "test-ecosystem-grafana-internal-service")).len(),
                1
            );
        }

        /// Story: with an ingress host, Grafana gets its own path on it
        #[test]
        fn story_ingress_routes_grafana_sub_path() {
            let resources = grafana(&sample_ecosystem_with_ingress());
            let ing = match find(&resources, "test-ecosystem-grafana-ingress") {
                DesiredResource::Ingress(i) => i,
                other => panic!("unexpected {}", other.kind()),
            };
            let path = &ing.spec.as_ref().unwrap().rules.as_ref().unwrap()[0]
                .http
                .as_ref()
                .unwrap()
                .paths[0];
            assert_eq!(path.path.as_deref(), Some("/test-ecosystem-grafana"));
            let backend = path.backend.service.as_ref().unwrap();
            assert_eq!(backend.name, "test-ecosystem-grafana-external-service");
            assert_eq!(backend.port.as_ref().unwrap().number, Some(3000));
        }

        #[test]
        fn test_no_ingress_without_host() {
            let resources = grafana(&sample_ecosystem());
            assert!(!resources
                .iter()
                .any(|r| r.kind() == crate::resources::ResourceKind::Ingress));
        }
    }

    #[test]
    fn test_generate_covers_all_three_workloads() {
        let resources = generate(&sample_ecosystem());
        let total: i32 = resources.iter().filter_map(|r| r.replicas()).sum();
        assert_eq!(total, sample_ecosystem().spec.monitoring.total_replicas());
    }
}
