//! Per-tier readiness from running pod counts

use kube::ResourceExt;

use crate::controller::KubeClient;
use crate::crd::{GalasaEcosystem, GalasaEcosystemSpec, GalasaEcosystemStatus, RestartSnapshot};
use crate::resources::Tier;
use crate::Error;

/// Running pods per tier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierCounts {
    /// etcd members
    pub cps: i32,
    /// CouchDB pods
    pub ras: i32,
    /// API server pods
    pub api: i32,
    /// Engine controller pods
    pub engine_controller: i32,
    /// Resource monitor pods
    pub resmon: i32,
    /// Simbank pods
    pub simbank: i32,
    /// Metrics, Prometheus and Grafana pods together
    pub monitoring: i32,
}

/// Count running pods of every tier
pub async fn observe(kube: &dyn KubeClient, ecosystem: &GalasaEcosystem) -> Result<TierCounts, Error> {
    let namespace = ecosystem.namespace().unwrap_or_default();
    let eco = ecosystem.name_any();
    let count = |tier: Tier| {
        let selector = tier.selector(&eco);
        let namespace = namespace.clone();
        async move { kube.count_running_pods(&namespace, &selector).await }
    };

    Ok(TierCounts {
        cps: count(Tier::Cps).await?,
        ras: count(Tier::Ras).await?,
        api: count(Tier::ApiServer).await?,
        engine_controller: count(Tier::EngineController).await?,
        resmon: count(Tier::ResourceMonitor).await?,
        simbank: count(Tier::Simbank).await?,
        monitoring: count(Tier::Metrics).await?
            + count(Tier::Prometheus).await?
            + count(Tier::Grafana).await?,
    })
}

impl TierCounts {
    /// Copy the counts into the status
    pub fn record(&self, status: &mut GalasaEcosystemStatus) {
        status.cps_ready_replicas = self.cps;
        status.ras_ready_replicas = self.ras;
        status.api_ready_replicas = self.api;
        status.engine_controller_ready_replicas = self.engine_controller;
        status.resmon_ready_replicas = self.resmon;
        status.simbank_ready_replicas = self.simbank;
        status.monitoring_ready_replicas = self.monitoring;
    }

    /// The property store, result archive or API server dropped below the
    /// pods it needs to serve
    ///
    /// A tier the spec scales to zero is never lost.
    pub fn lost_core_tier(&self, spec: &GalasaEcosystemSpec) -> bool {
        self.cps < required(spec.propertystore.cluster_size)
            || self.ras < required(spec.ras_spec.replicas)
            || self.api < required(spec.apiserver.replicas)
    }

    /// Every tier runs exactly its desired number of pods
    pub fn all_ready(&self, spec: &GalasaEcosystemSpec) -> bool {
        self.cps == spec.propertystore.cluster_size
            && self.ras == spec.ras_spec.replicas
            && self.api == spec.apiserver.replicas
            && self.engine_controller == spec.engine_controller.replicas
            && self.resmon == spec.engine_resmon.replicas
            && self.simbank == spec.simbank.replicas
            && self.monitoring == spec.monitoring.total_replicas()
    }

    /// Every restarted tier is back at its pre-restart size
    pub fn restored(&self, snapshot: &RestartSnapshot) -> bool {
        self.cps == snapshot.cps
            && self.ras == snapshot.ras
            && self.api == snapshot.api
            && self.engine_controller == snapshot.engine_controller
            && self.resmon == snapshot.resmon
    }
}

/// Pods a tier needs before the next tier may start
///
/// A tier scaled to zero never blocks the sequence.
pub fn required(replicas: i32) -> i32 {
    replicas.clamp(0, 1)
}
