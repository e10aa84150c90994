//! Error types for the Galasa ecosystem operator

use thiserror::Error;

/// Main error type for ecosystem reconciliation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for the GalasaEcosystem spec
    #[error("validation error: {0}")]
    Validation(String),

    /// Failure talking to the configuration property store
    #[error("property store error: {0}")]
    PropertyStore(String),

    /// Failure talking to the API server test catalog
    #[error("test catalog error: {0}")]
    TestCatalog(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A service has not been assigned the node port we need yet
    #[error("missing endpoint: {0}")]
    MissingEndpoint(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a property store error with the given message
    pub fn property_store(msg: impl Into<String>) -> Self {
        Self::PropertyStore(msg.into())
    }

    /// Create a test catalog error with the given message
    pub fn test_catalog(msg: impl Into<String>) -> Self {
        Self::TestCatalog(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a missing endpoint error for a service port
    pub fn missing_endpoint(service: &str, port: &str) -> Self {
        Self::MissingEndpoint(format!("service {service} has no node port for {port}"))
    }

    /// Whether retrying the same pass could succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Validation(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::TestCatalog(e.to_string())
    }
}
