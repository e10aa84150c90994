//! GalasaEcosystem Custom Resource Definition
//!
//! A GalasaEcosystem describes one complete Galasa deployment: the etcd
//! property store, the CouchDB result archive, the API server, the engine
//! workers, the Simbank simulator and the monitoring stack.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    ApiServerSpec, Condition, ConditionStatus, EngineControllerSpec, MonitoringSpec,
    PropertyStoreSpec, RestartPhase, RestartSnapshot, ResultArchiveSpec, WorkerSpec,
};

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_busybox_image() -> String {
    "busybox:latest".to_string()
}

/// Specification for a GalasaEcosystem
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "galasa.dev",
    version = "v1alpha1",
    kind = "GalasaEcosystem",
    plural = "galasaecosystems",
    shortname = "gecosystem",
    status = "GalasaEcosystemStatus",
    namespaced,
    printcolumn = r#"{"name":"READY","type":"boolean","jsonPath":".status.ecosystemReady"}"#,
    printcolumn = r#"{"name":"BOOTSTRAPURL","type":"string","jsonPath":".status.bootstrapUrl"}"#,
    printcolumn = r#"{"name":"GRAFANAURL","type":"string","jsonPath":".status.grafanaUrl"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GalasaEcosystemSpec {
    /// Tag used for every Galasa image
    pub galasa_version: String,

    /// Registry prefix for Galasa images
    pub docker_registry: String,

    /// Maven repository holding the Simbank OBR
    #[serde(default)]
    pub maven_repository: String,

    /// Scheme and host used to build external URLs, e.g. `http://galasa.example.com`
    pub external_hostname: String,

    /// Storage class for every volume claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Pull policy for all containers
    #[serde(default = "default_pull_policy")]
    pub image_pull_policy: String,

    /// Ingress class for the API server and Grafana ingresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,

    /// Host serving the ingresses; when unset, node ports are used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_hostname: Option<String>,

    /// Image for volume-permission init containers
    #[serde(default = "default_busybox_image")]
    pub busybox_image: String,

    /// Extra engine controller settings, overriding generated keys
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    /// etcd property store
    #[serde(default)]
    pub propertystore: PropertyStoreSpec,

    /// CouchDB result archive store
    #[serde(default)]
    pub ras_spec: ResultArchiveSpec,

    /// API server
    #[serde(default)]
    pub apiserver: ApiServerSpec,

    /// Engine controller
    #[serde(default)]
    pub engine_controller: EngineControllerSpec,

    /// Resource monitor
    #[serde(default)]
    pub engine_resmon: WorkerSpec,

    /// Simbank simulator
    #[serde(default)]
    pub simbank: WorkerSpec,

    /// Metrics, Prometheus and Grafana
    #[serde(default)]
    pub monitoring: MonitoringSpec,
}

impl GalasaEcosystemSpec {
    /// Image name of the Galasa boot jar image in the configured registry
    pub fn boot_image_name(&self) -> String {
        format!(
            "{}/galasa-boot-embedded-amd64",
            self.docker_registry.trim_end_matches('/')
        )
    }

    /// Boot image tagged with `galasaVersion`
    pub fn boot_image(&self) -> String {
        format!("{}:{}", self.boot_image_name(), self.galasa_version)
    }

    /// Ingress host if one is configured and non-empty
    pub fn ingress_host(&self) -> Option<&str> {
        self.ingress_hostname
            .as_deref()
            .map(|h| h.trim_end_matches('/'))
            .filter(|h| !h.is_empty())
    }

    /// External hostname without a trailing slash
    pub fn external_base(&self) -> &str {
        self.external_hostname.trim_end_matches('/')
    }

    /// Validate the ecosystem specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.galasa_version.trim().is_empty() {
            return Err(crate::Error::validation("galasaVersion must be set"));
        }
        if self.docker_registry.trim().is_empty() {
            return Err(crate::Error::validation("dockerRegistry must be set"));
        }
        if self.external_hostname.trim().is_empty() {
            return Err(crate::Error::validation("externalHostname must be set"));
        }
        if self.propertystore.cluster_size < 1 {
            return Err(crate::Error::validation(
                "propertystore.clusterSize must be at least 1",
            ));
        }

        let replicas = [
            ("rasSpec.replicas", self.ras_spec.replicas),
            ("apiserver.replicas", self.apiserver.replicas),
            ("engineController.replicas", self.engine_controller.replicas),
            ("engineResmon.replicas", self.engine_resmon.replicas),
            ("simbank.replicas", self.simbank.replicas),
            ("monitoring.metricsReplicas", self.monitoring.metrics_replicas),
            ("monitoring.prometheusReplicas", self.monitoring.prometheus_replicas),
            ("monitoring.grafanaReplicas", self.monitoring.grafana_replicas),
        ];
        if let Some((field, value)) = replicas.iter().find(|(_, v)| *v < 0) {
            return Err(crate::Error::validation(format!(
                "{field} must not be negative (got {value})"
            )));
        }

        Ok(())
    }

    /// Capture the replica counts a restart has to put back
    pub fn restart_snapshot(&self) -> RestartSnapshot {
        RestartSnapshot {
            cps: self.propertystore.cluster_size,
            ras: self.ras_spec.replicas,
            api: self.apiserver.replicas,
            engine_controller: self.engine_controller.replicas,
            resmon: self.engine_resmon.replicas,
            metrics: self.monitoring.metrics_replicas,
        }
    }
}

/// Status for a GalasaEcosystem
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GalasaEcosystemStatus {
    /// Running etcd pods
    #[serde(default)]
    pub cps_ready_replicas: i32,

    /// Running CouchDB pods
    #[serde(default)]
    pub ras_ready_replicas: i32,

    /// Running API server pods
    #[serde(default)]
    pub api_ready_replicas: i32,

    /// Running engine controller pods
    #[serde(default)]
    pub engine_controller_ready_replicas: i32,

    /// Running resource monitor pods
    #[serde(default)]
    pub resmon_ready_replicas: i32,

    /// Running simbank pods
    #[serde(default)]
    pub simbank_ready_replicas: i32,

    /// Running metrics, Prometheus and Grafana pods
    #[serde(default)]
    pub monitoring_ready_replicas: i32,

    /// URL the Galasa framework bootstraps from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_url: Option<String>,

    /// URL of the API server test catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_catalog_url: Option<String>,

    /// URL of the Grafana dashboards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana_url: Option<String>,

    /// External etcd endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cps_url: Option<String>,

    /// Every tier runs its desired number of pods
    #[serde(default)]
    pub ecosystem_ready: bool,

    /// A controlled restart of the worker tiers is in progress
    #[serde(default)]
    pub ecosystem_restarting: bool,

    /// Step of the controlled restart
    #[serde(default)]
    pub restart_phase: RestartPhase,

    /// Replica counts to restore when the restart finishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_snapshot: Option<RestartSnapshot>,

    /// Initial properties and store locations have been pushed into etcd
    #[serde(default)]
    pub property_store_seeded: bool,

    /// The result archive location has been pushed into etcd
    #[serde(default)]
    pub result_archive_registered: bool,

    /// The SIMBANK test stream and catalog have been set up
    #[serde(default)]
    pub simbank_registered: bool,

    /// Conditions representing the ecosystem state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation last acted upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl GalasaEcosystemStatus {
    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        self.set_condition(condition);
        self
    }

    /// Replace any condition of the same type
    ///
    /// The transition time is kept when status and reason are unchanged.
    pub fn set_condition(&mut self, mut condition: Condition) {
        if let Some(existing) = self.conditions.iter().find(|c| c.type_ == condition.type_) {
            if existing.status == condition.status && existing.reason == condition.reason {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
    }

    /// Look up a condition by type
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Record overall readiness in both the flag and the Ready condition
    pub fn mark_ready(&mut self, ready: bool, reason: &str, message: impl Into<String>) {
        self.ecosystem_ready = ready;
        self.set_condition(Condition::new(
            "Ready",
            ConditionStatus::from(ready),
            reason,
            message,
        ));
    }

    /// Whether a restart is underway
    pub fn is_restarting(&self) -> bool {
        self.ecosystem_restarting || self.restart_phase != RestartPhase::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn sample_spec() -> GalasaEcosystemSpec {
        serde_json::from_value(serde_json::json!({
            "galasaVersion": "0.30.0",
            "dockerRegistry": "docker.galasa.dev",
            "mavenRepository": "https://repo.maven.apache.org/maven2",
            "externalHostname": "http://galasa.example.com"
        }))
        .unwrap()
    }

    mod spec_defaults {
        use super::*;

        /// Story: a user only fills in the mandatory fields and gets a working ecosystem
        #[test]
        fn story_minimal_spec_fills_every_tier_with_defaults() {
            let spec = sample_spec();
            assert_eq!(spec.image_pull_policy, "IfNotPresent");
            assert_eq!(spec.busybox_image, "busybox:latest");
            assert_eq!(spec.propertystore.cluster_size, 1);
            assert_eq!(spec.ras_spec.replicas, 1);
            assert_eq!(spec.apiserver.replicas, 1);
            assert_eq!(spec.engine_controller.replicas, 1);
            assert_eq!(spec.engine_resmon.replicas, 1);
            assert_eq!(spec.simbank.replicas, 1);
            assert_eq!(spec.monitoring.total_replicas(), 3);
            assert!(spec.validate().is_ok());
        }

        #[test]
        fn test_boot_image_uses_registry_and_version() {
            let mut spec = sample_spec();
            spec.docker_registry = "docker.galasa.dev/".to_string();
            assert_eq!(
                spec.boot_image(),
                "docker.galasa.dev/galasa-boot-embedded-amd64:0.30.0"
            );
        }

        #[test]
        fn test_blank_ingress_host_is_ignored() {
            let mut spec = sample_spec();
            assert_eq!(spec.ingress_host(), None);
            spec.ingress_hostname = Some("".to_string());
            assert_eq!(spec.ingress_host(), None);
            spec.ingress_hostname = Some("https://galasa.example.com/".to_string());
            assert_eq!(spec.ingress_host(), Some("https://galasa.example.com"));
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn test_missing_version_is_rejected() {
            let mut spec = sample_spec();
            spec.galasa_version = " ".to_string();
            let err = spec.validate().unwrap_err();
            assert!(err.to_string().contains("galasaVersion"));
        }

        #[test]
        fn test_zero_cluster_size_is_rejected() {
            let mut spec = sample_spec();
            spec.propertystore.cluster_size = 0;
            let err = spec.validate().unwrap_err();
            assert!(err.to_string().contains("clusterSize"));
        }

        #[test]
        fn test_negative_replicas_are_rejected() {
            let mut spec = sample_spec();
            spec.monitoring.grafana_replicas = -1;
            let err = spec.validate().unwrap_err();
            assert!(err.to_string().contains("monitoring.grafanaReplicas"));
        }

        /// Story: scaling a worker tier to zero is a legal spec (restarts do exactly that)
        #[test]
        fn story_zero_replicas_are_valid() {
            let mut spec = sample_spec();
            spec.apiserver.replicas = 0;
            spec.engine_controller.replicas = 0;
            assert!(spec.validate().is_ok());
        }
    }

    mod status {
        use super::*;

        #[test]
        fn test_restart_snapshot_copies_current_replicas() {
            let mut spec = sample_spec();
            spec.propertystore.cluster_size = 3;
            spec.engine_controller.replicas = 2;
            let snapshot = spec.restart_snapshot();
            assert_eq!(snapshot.cps, 3);
            assert_eq!(snapshot.engine_controller, 2);
            assert_eq!(snapshot.metrics, 1);
        }

        #[test]
        fn test_mark_ready_sets_flag_and_condition() {
            let mut status = GalasaEcosystemStatus::default();
            status.mark_ready(true, "AllTiersReady", "all tiers running");
            assert!(status.ecosystem_ready);
            let ready = status.get_condition("Ready").unwrap();
            assert_eq!(ready.status, ConditionStatus::True);
        }

        #[test]
        fn test_unchanged_condition_keeps_transition_time() {
            let mut status = GalasaEcosystemStatus::default();
            status.mark_ready(false, "WaitingForCps", "0/3");
            let first = status.get_condition("Ready").unwrap().last_transition_time;
            status.mark_ready(false, "WaitingForCps", "1/3");
            let second = status.get_condition("Ready").unwrap();
            assert_eq!(second.last_transition_time, first);
            assert_eq!(second.message, "1/3");
            assert_eq!(status.conditions.len(), 1);
        }

        #[test]
        fn test_status_serializes_camel_case_fields() {
            let status = GalasaEcosystemStatus {
                cps_ready_replicas: 3,
                bootstrap_url: Some("http://h:30080/bootstrap".to_string()),
                ..Default::default()
            };
            let json = serde_json::to_value(&status).unwrap();
            assert_eq!(json["cpsReadyReplicas"], 3);
            assert_eq!(json["bootstrapUrl"], "http://h:30080/bootstrap");
            assert_eq!(json["restartPhase"], "Normal");
            assert!(json.get("grafanaUrl").is_none());
        }
    }

    /// Story: the generated CRD exposes the columns operators look at
    #[test]
    fn story_crd_has_ready_and_url_print_columns() {
        let crd = GalasaEcosystem::crd();
        assert_eq!(crd.spec.group, "galasa.dev");
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        let columns: Vec<&str> = version
            .additional_printer_columns
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(columns, vec!["READY", "BOOTSTRAPURL", "GRAFANAURL", "Age"]);
        assert!(version.subresources.as_ref().unwrap().status.is_some());
    }
}
