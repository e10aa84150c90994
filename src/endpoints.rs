//! External endpoints published in the ecosystem status
//!
//! Everything here is derived from the spec and the node ports the cluster
//! assigned; nothing talks to the API server.

use crate::crd::GalasaEcosystemSpec;
use crate::resources::monitoring::grafana_path;
use crate::Error;

/// URLs clients use to reach the API server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiUrls {
    /// Framework bootstrap
    pub bootstrap: String,
    /// Test catalog root
    pub test_catalog: String,
}

/// `<externalHostname>:<port>`
pub fn node_port_endpoint(spec: &GalasaEcosystemSpec, node_port: i32) -> String {
    format!("{}:{node_port}", spec.external_base())
}

/// Framework store location, e.g. `etcd:http://host:31379`
pub fn store_location(scheme: &str, spec: &GalasaEcosystemSpec, node_port: i32) -> String {
    format!("{scheme}:{}", node_port_endpoint(spec, node_port))
}

fn public_base(
    spec: &GalasaEcosystemSpec,
    service: &str,
    port_name: &str,
    node_port: Option<i32>,
) -> Result<String, Error> {
    if let Some(host) = spec.ingress_host() {
        return Ok(host.to_string());
    }
    node_port
        .map(|port| node_port_endpoint(spec, port))
        .ok_or_else(|| Error::missing_endpoint(service, port_name))
}

/// Bootstrap and test catalog URLs
///
/// With an ingress host these hang off the ingress; otherwise off the API
/// server's external HTTP node port.
pub fn api_urls(
    spec: &GalasaEcosystemSpec,
    api_service: &str,
    http_node_port: Option<i32>,
) -> Result<ApiUrls, Error> {
    let base = public_base(spec, api_service, "http", http_node_port)?;
    Ok(ApiUrls {
        bootstrap: format!("{base}/bootstrap"),
        test_catalog: format!("{base}/testcatalog"),
    })
}

/// Grafana dashboard URL
pub fn grafana_url(
    ecosystem: &str,
    spec: &GalasaEcosystemSpec,
    grafana_service: &str,
    node_port: Option<i32>,
) -> Result<String, Error> {
    let base = public_base(spec, grafana_service, "grafana-external", node_port)?;
    Ok(format!("{base}{}", grafana_path(ecosystem)))
}

/// Host part of `externalHostname`, used as the Simbank z/OS image address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalHost {
    /// Host name or address without scheme or port
    pub host: String,
    /// Whether the scheme is `https`
    pub secure: bool,
}

/// Parse `externalHostname` into its host and scheme
pub fn external_host(spec: &GalasaEcosystemSpec) -> Result<ExternalHost, Error> {
    let url = reqwest::Url::parse(spec.external_base()).map_err(|e| {
        Error::validation(format!(
            "externalHostname {} is not a URL: {e}",
            spec.external_hostname
        ))
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::validation("externalHostname has no host"))?;
    Ok(ExternalHost {
        host: host.to_string(),
        secure: url.scheme() == "https",
    })
}
