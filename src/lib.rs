//! Galasa ecosystem operator
//!
//! Provisions and supervises a complete Galasa ecosystem from a single
//! `GalasaEcosystem` custom resource: the etcd configuration property store,
//! the CouchDB result archive, the API server, the engine controller and
//! resource monitor, the Simbank simulator and a Prometheus/Grafana
//! monitoring stack.
//!
//! # Modules
//!
//! - [`crd`] - The GalasaEcosystem custom resource
//! - [`controller`] - Reconciliation and the restart state machine
//! - [`resources`] - Pure generators for every tier's Kubernetes objects
//! - [`apply`] - Create-if-absent and replica drift correction
//! - [`readiness`] - Running pod counts per tier
//! - [`endpoints`] - External URLs and store locations
//! - [`property_store`] - Remote `etcdctl` access to the CPS
//! - [`testcatalog`] - HTTP client for the API server test catalog
//! - [`retry`] - Exponential backoff for remote calls
//! - [`config`] - Command line and environment settings
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod apply;
pub mod config;
pub mod controller;
pub mod crd;
pub mod endpoints;
pub mod error;
pub mod property_store;
pub mod readiness;
pub mod resources;
pub mod retry;
pub mod testcatalog;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager for server-side apply, creates and status patches
pub const FIELD_MANAGER: &str = "galasa-ecosystem-operator";
