//! Controlled restart of the Galasa worker tiers
//!
//! A restart scales the API server, engine controller, resource monitor and
//! metrics exporter to zero, waits for every framework pod to stop, then puts
//! the replica counts captured at the start back into the spec. The step is
//! persisted in `status.restartPhase` so a restarted operator picks up where
//! the previous one left off.
//!
//! [`plan`] is pure; the controller carries out the returned [`RestartStep`].

use serde_json::{json, Value};

use crate::crd::{GalasaEcosystemSpec, GalasaEcosystemStatus, RestartPhase, RestartSnapshot};
use crate::readiness::TierCounts;
use crate::resources::Tier;

/// Label carried by every pod running a Galasa framework
pub const RUNNING_FRAMEWORK_SELECTOR: &str = "galasa=running-framework";

/// Tiers whose replicas a restart takes down and puts back
pub const RESTARTED_TIERS: [Tier; 4] = [
    Tier::ApiServer,
    Tier::EngineController,
    Tier::ResourceMonitor,
    Tier::Metrics,
];

/// What the controller should do about a restart in this pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestartStep {
    /// No restart in progress or needed
    Steady,
    /// Start a restart: record the snapshot and scale the worker tiers to zero
    BeginShutdown(RestartSnapshot),
    /// Worker or framework pods still exist
    Draining {
        /// Pods still present
        running: i32,
    },
    /// Everything stopped; write the snapshot back into the spec
    Restore(RestartSnapshot),
    /// Replicas restored but the tiers are not back yet
    AwaitingReady,
    /// Restart finished
    Complete,
}

impl RestartStep {
    /// Whether the normal tier walk should run after this step
    pub fn continues_reconcile(&self) -> bool {
        matches!(
            self,
            RestartStep::Steady | RestartStep::AwaitingReady | RestartStep::Complete
        )
    }
}

/// Decide the restart step for this pass
///
/// `running` is the number of worker and framework pods still present. It is
/// only consulted while scaling down.
pub fn plan(
    spec: &GalasaEcosystemSpec,
    status: &GalasaEcosystemStatus,
    counts: &TierCounts,
    running: i32,
) -> RestartStep {
    match status.restart_phase {
        RestartPhase::Normal => {
            let lost = status.ecosystem_ready && counts.lost_core_tier(spec);
            if status.ecosystem_restarting || lost {
                RestartStep::BeginShutdown(spec.restart_snapshot())
            } else {
                RestartStep::Steady
            }
        }
        RestartPhase::ScalingDown if running > 0 => RestartStep::Draining { running },
        RestartPhase::ScalingDown => match &status.restart_snapshot {
            Some(snapshot) => RestartStep::Restore(snapshot.clone()),
            None => RestartStep::Complete,
        },
        RestartPhase::Restoring => match &status.restart_snapshot {
            Some(snapshot) if !counts.restored(snapshot) => RestartStep::AwaitingReady,
            _ => RestartStep::Complete,
        },
    }
}

fn replica_patch(api: i32, engine_controller: i32, resmon: i32, metrics: i32) -> Value {
    json!({
        "spec": {
            "apiserver": { "replicas": api },
            "engineController": { "replicas": engine_controller },
            "engineResmon": { "replicas": resmon },
            "monitoring": { "metricsReplicas": metrics },
        }
    })
}

/// Merge patch scaling every restarted tier to zero
pub fn scale_down_patch() -> Value {
    replica_patch(0, 0, 0, 0)
}

/// Merge patch putting the captured replica counts back
pub fn restore_patch(snapshot: &RestartSnapshot) -> Value {
    replica_patch(
        snapshot.api,
        snapshot.engine_controller,
        snapshot.resmon,
        snapshot.metrics,
    )
}

/// Label selectors of every pod that must be gone before restoring
pub fn drain_selectors(ecosystem: &str) -> Vec<String> {
    RESTARTED_TIERS
        .iter()
        .map(|tier| tier.selector(ecosystem))
        .chain(std::iter::once(RUNNING_FRAMEWORK_SELECTOR.to_string()))
        .collect()
}
