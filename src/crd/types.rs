//! Shared types for the GalasaEcosystem CRD

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ResourceRequirements;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn one() -> i32 {
    1
}

fn default_cps_storage() -> String {
    "1Gi".to_string()
}

fn default_ras_storage() -> String {
    "1Gi".to_string()
}

fn default_small_storage() -> String {
    "200Mi".to_string()
}

fn default_max_engines() -> u32 {
    10
}

fn default_engine_label() -> String {
    "k8s-standard-engine".to_string()
}

fn is_default_image(image: &ImageSpec) -> bool {
    image.name.is_none() && image.version.is_none()
}

/// Image name and tag override
///
/// Either half may be left out; the generator supplies the default for
/// that tier.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image repository, e.g. `quay.io/coreos/etcd`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Image tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ImageSpec {
    /// Resolve to `name:version`, falling back to the given defaults.
    ///
    /// Empty strings count as unset.
    pub fn resolve(&self, default_name: &str, default_version: &str) -> String {
        let name = non_empty(self.name.as_deref()).unwrap_or(default_name);
        let version = non_empty(self.version.as_deref()).unwrap_or(default_version);
        format!("{name}:{version}")
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Clustered etcd configuration property store (CPS, DSS and CREDS)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyStoreSpec {
    /// Number of etcd members
    #[serde(default = "one")]
    pub cluster_size: i32,

    /// Properties pushed into the store once it first comes up
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub init_props: BTreeMap<String, String>,

    /// Size of each member's data volume
    #[serde(default = "default_cps_storage")]
    pub storage: String,

    /// etcd image override
    #[serde(default, skip_serializing_if = "is_default_image")]
    pub image: ImageSpec,

    /// Container resource requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Node placement constraints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

impl Default for PropertyStoreSpec {
    fn default() -> Self {
        Self {
            cluster_size: one(),
            init_props: BTreeMap::new(),
            storage: default_cps_storage(),
            image: ImageSpec::default(),
            resources: None,
            node_selector: BTreeMap::new(),
        }
    }
}

/// CouchDB result archive store
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultArchiveSpec {
    /// Number of CouchDB pods
    #[serde(default = "one")]
    pub replicas: i32,

    /// Size of each pod's data volume
    #[serde(default = "default_ras_storage")]
    pub storage: String,

    /// CouchDB image override
    #[serde(default, skip_serializing_if = "is_default_image")]
    pub image: ImageSpec,

    /// Container resource requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Node placement constraints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

impl Default for ResultArchiveSpec {
    fn default() -> Self {
        Self {
            replicas: one(),
            storage: default_ras_storage(),
            image: ImageSpec::default(),
            resources: None,
            node_selector: BTreeMap::new(),
        }
    }
}

/// Galasa API server
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerSpec {
    /// Number of API server pods
    #[serde(default = "one")]
    pub replicas: i32,

    /// Size of the test catalog volume
    #[serde(default = "default_small_storage")]
    pub storage: String,

    /// Container resource requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Node placement constraints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

impl Default for ApiServerSpec {
    fn default() -> Self {
        Self {
            replicas: one(),
            storage: default_small_storage(),
            resources: None,
            node_selector: BTreeMap::new(),
        }
    }
}

/// Engine controller that launches test engine pods
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineControllerSpec {
    /// Number of controller pods
    #[serde(default = "one")]
    pub replicas: i32,

    /// Upper bound on concurrently running engines
    #[serde(default = "default_max_engines")]
    pub max_engines: u32,

    /// Label given to engine pods
    #[serde(default = "default_engine_label")]
    pub engine_label: String,

    /// Container resource requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Node placement constraints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

impl Default for EngineControllerSpec {
    fn default() -> Self {
        Self {
            replicas: one(),
            max_engines: default_max_engines(),
            engine_label: default_engine_label(),
            resources: None,
            node_selector: BTreeMap::new(),
        }
    }
}

/// Plain scale-out worker tier (resource monitor, simbank)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// Number of pods
    #[serde(default = "one")]
    pub replicas: i32,

    /// Image tag override; defaults to `galasaVersion`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Container resource requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Node placement constraints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

impl Default for WorkerSpec {
    fn default() -> Self {
        Self {
            replicas: one(),
            version: None,
            resources: None,
            node_selector: BTreeMap::new(),
        }
    }
}

/// Metrics exporter, Prometheus and Grafana
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    /// Metrics exporter pods
    #[serde(default = "one")]
    pub metrics_replicas: i32,

    /// Prometheus pods
    #[serde(default = "one")]
    pub prometheus_replicas: i32,

    /// Grafana pods
    #[serde(default = "one")]
    pub grafana_replicas: i32,

    /// Prometheus volume size
    #[serde(default = "default_small_storage")]
    pub prometheus_storage: String,

    /// Grafana volume size
    #[serde(default = "default_small_storage")]
    pub grafana_storage: String,

    /// Metrics exporter image override
    #[serde(default, skip_serializing_if = "is_default_image")]
    pub metrics_image: ImageSpec,

    /// Prometheus image override
    #[serde(default, skip_serializing_if = "is_default_image")]
    pub prometheus_image: ImageSpec,

    /// Grafana image override
    #[serde(default, skip_serializing_if = "is_default_image")]
    pub grafana_image: ImageSpec,

    /// Node placement constraints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

impl Default for MonitoringSpec {
    fn default() -> Self {
        Self {
            metrics_replicas: one(),
            prometheus_replicas: one(),
            grafana_replicas: one(),
            prometheus_storage: default_small_storage(),
            grafana_storage: default_small_storage(),
            metrics_image: ImageSpec::default(),
            prometheus_image: ImageSpec::default(),
            grafana_image: ImageSpec::default(),
            node_selector: BTreeMap::new(),
        }
    }
}

impl MonitoringSpec {
    /// Pods expected across the whole monitoring stack
    pub fn total_replicas(&self) -> i32 {
        self.metrics_replicas + self.prometheus_replicas + self.grafana_replicas
    }
}

/// Where the ecosystem is in a controlled restart
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RestartPhase {
    /// No restart in progress
    #[default]
    Normal,
    /// Worker tiers scaled to zero, waiting for their pods to drain
    ScalingDown,
    /// Worker tiers restored, waiting for them to become ready
    Restoring,
}

impl std::fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartPhase::Normal => write!(f, "Normal"),
            RestartPhase::ScalingDown => write!(f, "ScalingDown"),
            RestartPhase::Restoring => write!(f, "Restoring"),
        }
    }
}

/// Desired replica counts captured when a restart begins
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestartSnapshot {
    /// Property store cluster size
    pub cps: i32,
    /// Result archive replicas
    pub ras: i32,
    /// API server replicas
    pub api: i32,
    /// Engine controller replicas
    pub engine_controller: i32,
    /// Resource monitor replicas
    pub resmon: i32,
    /// Metrics exporter replicas
    pub metrics: i32,
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, Restarting)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}
