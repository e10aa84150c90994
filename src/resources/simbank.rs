//! Simbank mainframe simulator

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::{
    app_labels, container_port, external_service, node_selector, object_meta, service_port,
    DesiredResource, Tier,
};
use crate::crd::GalasaEcosystem;

/// 3270 telnet port
pub const TELNET_PORT: i32 = 2023;
/// Web service port
pub const WEBSERVICE_PORT: i32 = 2080;
/// Database port
pub const DATABASE_PORT: i32 = 2027;
/// z/OSMF emulation port
pub const ZOSMF_PORT: i32 = 2040;

/// External service port names
pub const TELNET_PORT_NAME: &str = "simbank-telnet";
/// See [`TELNET_PORT_NAME`]
pub const WEBSERVICE_PORT_NAME: &str = "simbank-webservice";
/// See [`TELNET_PORT_NAME`]
pub const DATABASE_PORT_NAME: &str = "simbank-database";
/// See [`TELNET_PORT_NAME`]
pub const ZOSMF_PORT_NAME: &str = "simbank-mf";

/// Simbank version: `simbank.version` if set, otherwise `galasaVersion`
pub fn version(ecosystem: &GalasaEcosystem) -> &str {
    ecosystem
        .spec
        .simbank
        .version
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(&ecosystem.spec.galasa_version)
}

/// Objects for the simbank tier
pub fn generate(ecosystem: &GalasaEcosystem) -> Vec<DesiredResource> {
    vec![
        DesiredResource::Deployment(simulator(ecosystem)),
        DesiredResource::Service(external_service(
            ecosystem,
            Tier::Simbank,
            vec![
                service_port(TELNET_PORT_NAME, TELNET_PORT),
                service_port(WEBSERVICE_PORT_NAME, WEBSERVICE_PORT),
                service_port(DATABASE_PORT_NAME, DATABASE_PORT),
                service_port(ZOSMF_PORT_NAME, ZOSMF_PORT),
            ],
        )),
    ]
}

fn simulator(ecosystem: &GalasaEcosystem) -> Deployment {
    let eco = ecosystem.name_any();
    let app = Tier::Simbank.workload_name(&eco);
    let simbank = &ecosystem.spec.simbank;

    let container = Container {
        name: app.clone(),
        image: Some(format!(
            "{}:{}",
            ecosystem.spec.boot_image_name(),
            version(ecosystem)
        )),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec!["java".to_string()]),
        args: Some(vec!["-jar".to_string(), "simplatform.jar".to_string()]),
        ports: Some(vec![
            container_port("telnet", TELNET_PORT),
            container_port("webservice", WEBSERVICE_PORT),
            container_port("database", DATABASE_PORT),
            container_port("mf", ZOSMF_PORT),
        ]),
        resources: simbank.resources.clone(),
        ..Default::default()
    };

    Deployment {
        metadata: object_meta(ecosystem, app.clone(), &app),
        spec: Some(DeploymentSpec {
            replicas: Some(simbank.replicas),
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
                    node_selector: node_selector(&simbank.node_selector),
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
    use crate::resources::test_fixtures::*;

    #[test]
    fn test_external_service_exposes_four_ports() {
        let resources = generate(&sample_ecosystem());
        let svc = service(&resources, "test-ecosystem-simbank-external-service");
        assert_eq!(svc.spec.as_ref().unwrap().type_.as_deref(), Some("NodePort"));
        assert_eq!(
            port_names(svc),
            vec![
                ("simbank-telnet".to_string(), 2023),
                ("simbank-webservice".to_string(), 2080),
                ("simbank-database".to_string(), 2027),
                ("simbank-mf".to_string(), 2040),
            ]
        );
    }

    #[test]
    fn test_deployment_runs_simplatform() {
        let mut eco = sample_ecosystem();
        eco.spec.simbank.replicas = 0;
        let resources = generate(&eco);
        let d = deployment(&resources, "test-ecosystem-simbank");
        let spec = d.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(0));
        let c = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(
            c.args.as_ref().unwrap(),
            &vec!["-jar".to_string(), "simplatform.jar".to_string()]
        );
        assert_eq!(
            c.image.as_deref(),
            Some("docker.galasa.dev/galasa-boot-embedded-amd64:0.30.0")
        );
    }

    #[test]
    fn test_version_falls_back_to_galasa_version() {
        let mut eco = sample_ecosystem();
        assert_eq!(version(&eco), "0.30.0");
        eco.spec.simbank.version = Some("0.29.0".to_string());
        assert_eq!(version(&eco), "0.29.0");
    }
}
