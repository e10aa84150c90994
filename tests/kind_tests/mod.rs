//! Integration tests for the Galasa ecosystem operator
//!
//! These tests need a Kubernetes cluster (kind works) and tell the story of
//! how a Galasa administrator interacts with the operator.
//!
//! - `crd_operations`: creating, reading and deleting GalasaEcosystem
//!   resources through the Kubernetes API
//! - `ecosystem_lifecycle`: the reconciler creating the first tier and
//!   reporting status against a live API server
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod crd_operations;
mod ecosystem_lifecycle;
mod helpers;
