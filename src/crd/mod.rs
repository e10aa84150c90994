//! Custom Resource Definitions for the Galasa ecosystem operator

mod ecosystem;
mod types;

pub use ecosystem::{GalasaEcosystem, GalasaEcosystemSpec, GalasaEcosystemStatus};
pub use types::{
    ApiServerSpec, Condition, ConditionStatus, EngineControllerSpec, ImageSpec, MonitoringSpec,
    PropertyStoreSpec, RestartPhase, RestartSnapshot, ResultArchiveSpec, WorkerSpec,
};
