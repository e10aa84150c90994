//! Remote access to the etcd configuration property store
//!
//! Properties are read and written by running `etcdctl` inside a CPS pod,
//! so the operator never needs network access to etcd itself. The one-shot
//! seeding steps the reconciler performs are plain functions over
//! [`PropertyStore`] so they can be tested without a cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, ListParams};
use kube::{Client, ResourceExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::endpoints::ExternalHost;
use crate::resources::Tier;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Container in the CPS pods that has `etcdctl`
const ETCD_CONTAINER: &str = "etcd";

/// Key/value access to the CPS
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Set `key` to `value`
    async fn put(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Current value of `key`; empty when the key is not set
    async fn get(&self, key: &str) -> Result<String, Error>;
}

/// Hands out a [`PropertyStore`] for one ecosystem's CPS
#[cfg_attr(test, automock)]
pub trait PropertyStoreFactory: Send + Sync {
    /// Store backed by the CPS pods of `ecosystem` in `namespace`
    fn for_ecosystem(&self, namespace: &str, ecosystem: &str) -> Arc<dyn PropertyStore>;
}

/// [`PropertyStore`] that execs `etcdctl` in the first CPS pod
pub struct EtcdExecStore {
    client: Client,
    namespace: String,
    selector: String,
    retry: RetryConfig,
}

impl EtcdExecStore {
    /// Store for the CPS pods matching `selector` in `namespace`
    pub fn new(client: Client, namespace: &str, selector: String) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            selector,
            retry: RetryConfig::default(),
        }
    }

    async fn target_pod(&self, pods: &Api<Pod>) -> Result<String, Error> {
        let list = pods.list(&ListParams::default().labels(&self.selector)).await?;
        list.items
            .first()
            .map(|p| p.name_any())
            .ok_or_else(|| {
                Error::property_store(format!(
                    "no pods match {} in {}",
                    self.selector, self.namespace
                ))
            })
    }

    async fn etcdctl(&self, args: &[&str]) -> Result<String, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pod = self.target_pod(&pods).await?;

        let command: Vec<String> = std::iter::once("etcdctl")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        debug!(pod = %pod, op = args.first().copied().unwrap_or_default(), "running etcdctl");

        let mut attached = pods
            .exec(
                &pod,
                command,
                &AttachParams::default().container(ETCD_CONTAINER),
            )
            .await?;

        let status = attached.take_status();
        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let (output, errors) = tokio::try_join!(read_stream(stdout), read_stream(stderr))?;

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| Error::property_store(format!("exec session failed: {e}")))?;

        exec_outcome(args.first().copied().unwrap_or_default(), status, output, &errors)
    }
}

async fn read_stream(stream: Option<impl AsyncRead + Unpin>) -> Result<String, Error> {
    let mut text = String::new();
    if let Some(mut stream) = stream {
        stream
            .read_to_string(&mut text)
            .await
            .map_err(|e| Error::property_store(format!("reading etcdctl output: {e}")))?;
    }
    Ok(text)
}

/// Turn the exec status and captured streams into the command's result
fn exec_outcome(
    op: &str,
    status: Option<Status>,
    stdout: String,
    stderr: &str,
) -> Result<String, Error> {
    match status {
        Some(s) if s.status.as_deref() == Some("Success") => Ok(stdout),
        Some(s) => {
            let mut message = format!("etcdctl {op} failed: {}", s.message.unwrap_or_default());
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                message.push_str(": ");
                message.push_str(stderr);
            }
            Err(Error::property_store(message))
        }
        None => Err(Error::property_store("exec finished without a status")),
    }
}

#[async_trait]
impl PropertyStore for EtcdExecStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), Error> {
        let args = ["put", key, value];
        retry_with_backoff(&self.retry, "etcdctl put", || self.etcdctl(&args)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, Error> {
        let args = ["get", "--print-value-only", key];
        let raw = retry_with_backoff(&self.retry, "etcdctl get", || self.etcdctl(&args)).await?;
        Ok(raw.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Factory creating an [`EtcdExecStore`] per ecosystem
pub struct EtcdExecStoreFactory {
    client: Client,
}

impl EtcdExecStoreFactory {
    /// Factory sharing the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl PropertyStoreFactory for EtcdExecStoreFactory {
    fn for_ecosystem(&self, namespace: &str, ecosystem: &str) -> Arc<dyn PropertyStore> {
        Arc::new(EtcdExecStore::new(
            self.client.clone(),
            namespace,
            Tier::Cps.selector(ecosystem),
        ))
    }
}

/// Push the user's initial properties and point the DSS and CREDS at the CPS
///
/// `cps_location` is the framework store location, e.g. `etcd:http://host:31379`.
pub async fn seed_property_store(
    store: &dyn PropertyStore,
    init_props: &BTreeMap<String, String>,
    cps_location: &str,
) -> Result<(), Error> {
    for (key, value) in init_props {
        store.put(key, value).await?;
    }
    store
        .put("framework.dynamicstatus.store", cps_location)
        .await?;
    store
        .put("framework.credentials.store", cps_location)
        .await?;
    info!(props = init_props.len(), "property store seeded");
    Ok(())
}

/// Point the framework at the CouchDB result archive
pub async fn register_result_archive(
    store: &dyn PropertyStore,
    ras_location: &str,
) -> Result<(), Error> {
    store
        .put("framework.resultarchive.store", ras_location)
        .await?;
    info!(location = %ras_location, "result archive registered");
    Ok(())
}

/// Everything needed to describe the SIMBANK test stream and its z/OS image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimbankStream {
    /// Test catalog root published by the API server
    pub test_catalog_url: String,
    /// Simbank OBR version
    pub version: String,
    /// Maven repository hosting the OBR
    pub maven_repository: String,
    /// Address the simulator is reachable on
    pub host: ExternalHost,
    /// Node port of the telnet service
    pub telnet_port: i32,
    /// Node port of the web service
    pub webservice_port: i32,
    /// Node port of the database
    pub database_port: i32,
    /// Node port of the z/OSMF emulation
    pub zosmf_port: i32,
}

impl SimbankStream {
    /// Where the SIMBANK test catalog lives
    pub fn location(&self) -> String {
        format!("{}/simbank", self.test_catalog_url.trim_end_matches('/'))
    }
}

const SIMBANK: &str = "SIMBANK";

/// Define the SIMBANK stream, adding it to `framework.test.streams`
///
/// Returns whether the stream list had to be changed. Only then are the
/// image, credential and z/OSMF properties written.
pub async fn register_simbank_stream(
    store: &dyn PropertyStore,
    stream: &SimbankStream,
) -> Result<bool, Error> {
    let streams = store.get("framework.test.streams").await?;

    let prefix = "framework.test.stream.SIMBANK";
    store
        .put(&format!("{prefix}.description"), "Simbank tests")
        .await?;
    store
        .put(&format!("{prefix}.location"), &stream.location())
        .await?;
    store
        .put(
            &format!("{prefix}.obr"),
            &format!("mvn:dev.galasa/dev.galasa.simbank.obr/{}/obr", stream.version),
        )
        .await?;
    store
        .put(&format!("{prefix}.repo"), &stream.maven_repository)
        .await?;

    let streams = streams.trim();
    let updated = if streams.is_empty() {
        SIMBANK.to_string()
    } else if streams.split(',').any(|s| s.trim() == SIMBANK) {
        debug!("SIMBANK already a test stream");
        return Ok(false);
    } else {
        format!("{streams},{SIMBANK}")
    };
    store.put("framework.test.streams", &updated).await?;

    let host = stream.host.host.as_str();
    let telnet = stream.telnet_port.to_string();
    let zosmf = stream.zosmf_port.to_string();
    let database = stream.database_port.to_string();
    let webnet = stream.webservice_port.to_string();

    let mut props = vec![
        ("secure.credentials.SIMBANK.username", "IBMUSER"),
        ("secure.credentials.SIMBANK.password", "SYS1"),
        ("zos.dse.tag.SIMBANK.imageid", SIMBANK),
        ("zos.dse.tag.SIMBANK.clusterid", SIMBANK),
        ("zos.image.SIMBANK.ipv4.hostname", host),
        ("zos.image.SIMBANK.telnet.port", telnet.as_str()),
        ("zos.image.SIMBANK.telnet.tls", "false"),
        ("zos.image.SIMBANK.credentials", SIMBANK),
        ("zosmf.server.SIMBANK.images", SIMBANK),
        ("zosmf.server.SIMBANK.hostname", host),
        ("zosmf.server.SIMBANK.port", zosmf.as_str()),
    ];
    if !stream.host.secure {
        props.push(("zosmf.server.SIMBANK.https", "false"));
    }
    props.extend([
        ("simbank.dse.instance.name", SIMBANK),
        ("simbank.instance.SIMBANK.zos.image", SIMBANK),
        ("simbank.instance.SIMBANK.database.port", database.as_str()),
        ("simbank.instance.SIMBANK.webnet.port", webnet.as_str()),
    ]);

    for (key, value) in props {
        store.put(key, value).await?;
    }
    info!(streams = %updated, "SIMBANK stream added");
    Ok(true)
}
