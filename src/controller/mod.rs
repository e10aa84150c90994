//! Controller for GalasaEcosystem resources
//!
//! Reconciliation follows the observe-diff-act loop: count running pods,
//! advance the restart state machine, then create or scale the tiers in
//! dependency order.

mod ecosystem;
pub mod restart;

pub use ecosystem::{
    error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl,
};

#[cfg(test)]
pub use ecosystem::MockKubeClient;
