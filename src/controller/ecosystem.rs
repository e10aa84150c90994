//! GalasaEcosystem controller implementation
//!
//! Each pass observes how many pods of every tier are running, advances the
//! restart state machine, then walks the tiers in dependency order:
//! CPS, RAS, API server, then the engine controller, resource monitor,
//! Simbank and monitoring together. A tier that is not ready yet ends the
//! pass with a requeue. All state that has to survive between passes lives
//! in the status subresource, which is written once per pass.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::restart::{self, RestartStep};
use crate::apply::{ensure_all, KubeResourceStore, ResourceStore};
use crate::crd::{
    Condition, ConditionStatus, GalasaEcosystem, GalasaEcosystemStatus, RestartPhase,
};
use crate::endpoints::{
    api_urls, external_host, grafana_url, node_port_endpoint, store_location,
};
use crate::property_store::{
    register_result_archive, register_simbank_stream, seed_property_store, EtcdExecStoreFactory,
    PropertyStoreFactory, SimbankStream,
};
use crate::readiness::{self, required, TierCounts};
use crate::resources::{
    apiserver, cps, engines, monitoring, owner_reference, ras, simbank, DesiredResource, Tier,
};
use crate::testcatalog::{seed_catalog, HttpTestCatalog, TestCatalog};
use crate::Error;

/// Requeue while the property store or result archive comes up
const TIER_WAIT: Duration = Duration::from_secs(5);
/// Requeue while the API server comes up
const API_WAIT: Duration = Duration::from_secs(10);
/// Requeue between restart steps
const RESTART_POLL: Duration = Duration::from_secs(5);
/// Requeue while the worker tiers settle
const NOT_READY_WAIT: Duration = Duration::from_secs(10);
/// Periodic drift check of a ready ecosystem
const READY_RESYNC: Duration = Duration::from_secs(60);

/// Kubernetes operations the reconciler needs beyond creating its objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Replace the status of a GalasaEcosystem
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GalasaEcosystemStatus,
    ) -> Result<(), Error>;

    /// Live value of `status.ecosystemRestarting`
    ///
    /// `false` when the resource or its status is gone.
    async fn restart_requested(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Merge-patch the spec of a GalasaEcosystem
    ///
    /// Only the restart sequence uses this, to scale worker tiers.
    async fn patch_spec(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), Error>;

    /// Pods matching `selector` in phase `Running`
    async fn count_running_pods(&self, namespace: &str, selector: &str) -> Result<i32, Error>;

    /// Pods matching `selector` in any phase
    async fn count_pods(&self, namespace: &str, selector: &str) -> Result<i32, Error>;

    /// Node port assigned to the named port of a service
    ///
    /// `None` when the service or port does not exist or no node port has
    /// been allocated.
    async fn service_node_port(
        &self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> Result<Option<i32>, Error>;
}

/// [`KubeClient`] backed by the Kubernetes API
pub struct KubeClientImpl {
    client: Client,
    field_manager: String,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods.items)
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GalasaEcosystemStatus,
    ) -> Result<(), Error> {
        let api: Api<GalasaEcosystem> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn restart_requested(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<GalasaEcosystem> = Api::namespaced(self.client.clone(), namespace);
        let live = api.get_opt(name).await?;
        Ok(live
            .and_then(|eco| eco.status)
            .is_some_and(|status| status.ecosystem_restarting))
    }

    async fn patch_spec(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), Error> {
        let api: Api<GalasaEcosystem> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(patch),
        )
        .await?;
        Ok(())
    }

    async fn count_running_pods(&self, namespace: &str, selector: &str) -> Result<i32, Error> {
        let pods = self.list_pods(namespace, selector).await?;
        let running = pods
            .iter()
            .filter(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .is_some_and(|phase| phase == "Running")
            })
            .count();
        Ok(count(running))
    }

    async fn count_pods(&self, namespace: &str, selector: &str) -> Result<i32, Error> {
        let pods = self.list_pods(namespace, selector).await?;
        for pod in &pods {
            debug!(pod = %pod.name_any(), selector, "pod still present");
        }
        Ok(count(pods.len()))
    }

    async fn service_node_port(
        &self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> Result<Option<i32>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let Some(svc) = api.get_opt(service).await? else {
            return Ok(None);
        };
        Ok(svc
            .spec
            .and_then(|spec| spec.ports)
            .unwrap_or_default()
            .into_iter()
            .find(|p| p.name.as_deref() == Some(port_name))
            .and_then(|p| p.node_port))
    }
}

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .field_manager("galasa-ecosystem-operator")
///     .testcatalog_fixture("/usr/local/bin/galasa-resources/simplatform-testcatalog.json")
///     .build()?;
/// ```
pub struct Context {
    /// Status, spec and pod access
    pub kube: Arc<dyn KubeClient>,
    /// Where generated objects are looked up and created
    pub resources: Arc<dyn ResourceStore>,
    /// Access to each ecosystem's CPS
    pub property_stores: Arc<dyn PropertyStoreFactory>,
    /// API server test catalog
    pub catalog: Arc<dyn TestCatalog>,
    /// Simbank test catalog uploaded on first registration
    pub testcatalog_fixture: PathBuf,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        resources: Arc<dyn ResourceStore>,
        property_stores: Arc<dyn PropertyStoreFactory>,
        catalog: Arc<dyn TestCatalog>,
    ) -> Self {
        Self {
            kube,
            resources,
            property_stores,
            catalog,
            testcatalog_fixture: PathBuf::from("/nonexistent/simplatform-testcatalog.json"),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    field_manager: String,
    testcatalog_fixture: PathBuf,
    http_timeout: Duration,
    kube: Option<Arc<dyn KubeClient>>,
    resources: Option<Arc<dyn ResourceStore>>,
    property_stores: Option<Arc<dyn PropertyStoreFactory>>,
    catalog: Option<Arc<dyn TestCatalog>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: crate::FIELD_MANAGER.to_string(),
            testcatalog_fixture: PathBuf::new(),
            http_timeout: Duration::from_secs(30),
            kube: None,
            resources: None,
            property_stores: None,
            catalog: None,
        }
    }

    /// Field manager for creates and patches
    pub fn field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    /// Simbank test catalog file
    pub fn testcatalog_fixture(mut self, path: impl Into<PathBuf>) -> Self {
        self.testcatalog_fixture = path.into();
        self
    }

    /// Timeout for each test catalog request
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the resource store (primarily for testing)
    pub fn resource_store(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Override the property store access (primarily for testing)
    pub fn property_stores(mut self, stores: Arc<dyn PropertyStoreFactory>) -> Self {
        self.property_stores = Some(stores);
        self
    }

    /// Override the test catalog client (primarily for testing)
    pub fn test_catalog(mut self, catalog: Arc<dyn TestCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Build the Context
    ///
    /// Fails only when the HTTP client for the test catalog cannot be built.
    pub fn build(self) -> Result<Context, Error> {
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => Arc::new(HttpTestCatalog::new(self.http_timeout)?),
        };
        Ok(Context {
            kube: self.kube.unwrap_or_else(|| {
                Arc::new(KubeClientImpl::new(
                    self.client.clone(),
                    self.field_manager.clone(),
                ))
            }),
            resources: self.resources.unwrap_or_else(|| {
                Arc::new(KubeResourceStore::new(
                    self.client.clone(),
                    self.field_manager.clone(),
                ))
            }),
            property_stores: self
                .property_stores
                .unwrap_or_else(|| Arc::new(EtcdExecStoreFactory::new(self.client.clone()))),
            catalog,
            testcatalog_fixture: self.testcatalog_fixture,
        })
    }
}

/// Reconcile a GalasaEcosystem resource
///
/// Returns the requeue interval for the next pass, or an error that
/// [`error_policy`] turns into a retry.
#[instrument(skip(ecosystem, ctx), fields(ecosystem = %ecosystem.name_any()))]
pub async fn reconcile(ecosystem: Arc<GalasaEcosystem>, ctx: Arc<Context>) -> Result<Action, Error> {
    if ecosystem.metadata.deletion_timestamp.is_some() {
        debug!("ecosystem is being deleted");
        return Ok(Action::await_change());
    }
    let Some(namespace) = ecosystem.namespace() else {
        warn!("ecosystem has no namespace");
        return Ok(Action::await_change());
    };
    let name = ecosystem.name_any();
    info!("reconciling ecosystem");

    let mut status = ecosystem.status.clone().unwrap_or_default();
    status.observed_generation = ecosystem.metadata.generation;

    if let Err(e) = ecosystem.spec.validate() {
        warn!(error = %e, "ecosystem validation failed");
        status.set_condition(Condition::new(
            "InvalidSpec",
            ConditionStatus::True,
            "ValidationFailed",
            e.to_string(),
        ));
        status.mark_ready(false, "InvalidSpec", e.to_string());
        ctx.kube.patch_status(&namespace, &name, &status).await?;
        return Ok(Action::await_change());
    }
    status.conditions.retain(|c| c.type_ != "InvalidSpec");

    let restarting_at_start = status.is_restarting();
    let result = run_pass(&ecosystem, &ctx, &namespace, &mut status).await;
    if !restarting_at_start && !status.is_restarting() {
        keep_restart_request(&ctx, &namespace, &name, &mut status).await;
    }
    ctx.kube.patch_status(&namespace, &name, &status).await?;
    result
}

/// Carry over an `ecosystemRestarting` flag set while the pass ran
async fn keep_restart_request(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &mut GalasaEcosystemStatus,
) {
    match ctx.kube.restart_requested(namespace, name).await {
        Ok(true) => {
            info!("restart requested during the pass");
            status.ecosystem_restarting = true;
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, "could not re-read restart request"),
    }
}

/// One pass over the restart state machine and the tiers
///
/// Only mutates the in-memory status; the caller persists it.
async fn run_pass(
    ecosystem: &GalasaEcosystem,
    ctx: &Context,
    namespace: &str,
    status: &mut GalasaEcosystemStatus,
) -> Result<Action, Error> {
    let counts = readiness::observe(ctx.kube.as_ref(), ecosystem).await?;
    counts.record(status);
    debug!(?counts, "observed tiers");

    let running = if status.restart_phase == RestartPhase::ScalingDown {
        draining_pods(ctx, namespace, &ecosystem.name_any()).await?
    } else {
        0
    };

    let step = restart::plan(&ecosystem.spec, status, &counts, running);
    advance_restart(ecosystem, ctx, namespace, status, &step).await?;
    if !step.continues_reconcile() {
        return Ok(Action::requeue(RESTART_POLL));
    }

    let action = sequence_tiers(ecosystem, ctx, namespace, status, &counts).await?;
    if status.is_restarting() {
        return Ok(Action::requeue(RESTART_POLL));
    }
    Ok(action)
}

async fn draining_pods(ctx: &Context, namespace: &str, name: &str) -> Result<i32, Error> {
    let mut total = 0;
    for selector in restart::drain_selectors(name) {
        total += ctx.kube.count_pods(namespace, &selector).await?;
    }
    Ok(total)
}

/// Carry out a restart step
async fn advance_restart(
    ecosystem: &GalasaEcosystem,
    ctx: &Context,
    namespace: &str,
    status: &mut GalasaEcosystemStatus,
    step: &RestartStep,
) -> Result<(), Error> {
    let name = ecosystem.name_any();
    match step {
        RestartStep::Steady => {}
        RestartStep::BeginShutdown(snapshot) => {
            info!(?snapshot, "restarting ecosystem, scaling worker tiers down");
            ctx.kube
                .patch_spec(namespace, &name, &restart::scale_down_patch())
                .await?;
            status.restart_snapshot = Some(snapshot.clone());
            status.restart_phase = RestartPhase::ScalingDown;
            status.ecosystem_restarting = true;
            status.mark_ready(false, "Restarting", "worker tiers are restarting");
            status.set_condition(Condition::new(
                "Restarting",
                ConditionStatus::True,
                "ScalingDown",
                "waiting for framework pods to stop",
            ));
        }
        RestartStep::Draining { running } => {
            info!(running, "waiting for framework pods to stop");
            let workloads = restarted_workloads(ctx, namespace, ecosystem).await?;
            apply(ctx, namespace, ecosystem, workloads).await?;
        }
        RestartStep::Restore(snapshot) => {
            info!(?snapshot, "framework pods stopped, restoring replicas");
            ctx.kube
                .patch_spec(namespace, &name, &restart::restore_patch(snapshot))
                .await?;
            status.restart_phase = RestartPhase::Restoring;
            status.set_condition(Condition::new(
                "Restarting",
                ConditionStatus::True,
                "Restoring",
                "waiting for worker tiers to return",
            ));
        }
        RestartStep::AwaitingReady => debug!("waiting for restored tiers"),
        RestartStep::Complete => {
            if status.restart_snapshot.is_none() && status.restart_phase == RestartPhase::ScalingDown
            {
                warn!("restart had no replica snapshot, leaving spec as is");
            }
            info!("ecosystem restart finished");
            status.restart_phase = RestartPhase::Normal;
            status.restart_snapshot = None;
            status.ecosystem_restarting = false;
            status.set_condition(Condition::new(
                "Restarting",
                ConditionStatus::False,
                "RestartComplete",
                "worker tiers restarted",
            ));
        }
    }
    Ok(())
}

/// Workloads of the restarted tiers as the current spec wants them
async fn restarted_workloads(
    ctx: &Context,
    namespace: &str,
    ecosystem: &GalasaEcosystem,
) -> Result<Vec<DesiredResource>, Error> {
    let cps_port = required_node_port(
        ctx,
        namespace,
        &Tier::Cps.external_service(&ecosystem.name_any()),
        cps::CLIENT_PORT_NAME,
    )
    .await?;
    let cps_endpoint = node_port_endpoint(&ecosystem.spec, cps_port);

    let mut resources = apiserver::generate(ecosystem, &cps_endpoint);
    resources.extend(engines::engine_controller(ecosystem));
    resources.extend(engines::resource_monitor(ecosystem));
    resources.extend(monitoring::metrics(ecosystem));
    resources.retain(|r| r.replicas().is_some());
    Ok(resources)
}

async fn apply(
    ctx: &Context,
    namespace: &str,
    ecosystem: &GalasaEcosystem,
    resources: Vec<DesiredResource>,
) -> Result<(), Error> {
    let owner = owner_reference(ecosystem);
    ensure_all(ctx.resources.as_ref(), namespace, owner.as_ref(), resources).await?;
    Ok(())
}

async fn required_node_port(
    ctx: &Context,
    namespace: &str,
    service: &str,
    port_name: &str,
) -> Result<i32, Error> {
    ctx.kube
        .service_node_port(namespace, service, port_name)
        .await?
        .ok_or_else(|| Error::missing_endpoint(service, port_name))
}

/// Walk the tiers in dependency order
async fn sequence_tiers(
    ecosystem: &GalasaEcosystem,
    ctx: &Context,
    namespace: &str,
    status: &mut GalasaEcosystemStatus,
    counts: &TierCounts,
) -> Result<Action, Error> {
    let name = ecosystem.name_any();
    let spec = &ecosystem.spec;

    apply(ctx, namespace, ecosystem, cps::generate(ecosystem)).await?;
    if counts.cps != spec.propertystore.cluster_size {
        debug!(
            ready = counts.cps,
            want = spec.propertystore.cluster_size,
            "property store not ready"
        );
        status.mark_ready(false, "WaitingForPropertyStore", "etcd cluster is starting");
        return Ok(Action::requeue(TIER_WAIT));
    }

    let cps_port = required_node_port(
        ctx,
        namespace,
        &Tier::Cps.external_service(&name),
        cps::CLIENT_PORT_NAME,
    )
    .await?;
    let cps_endpoint = node_port_endpoint(spec, cps_port);
    status.cps_url = Some(cps_endpoint.clone());

    if !status.property_store_seeded {
        let store = ctx.property_stores.for_ecosystem(namespace, &name);
        let location = store_location("etcd", spec, cps_port);
        seed_property_store(store.as_ref(), &spec.propertystore.init_props, &location).await?;
        status.property_store_seeded = true;
    }

    apply(ctx, namespace, ecosystem, ras::generate(ecosystem)).await?;
    if counts.ras < required(spec.ras_spec.replicas) {
        debug!(ready = counts.ras, "result archive not ready");
        status.mark_ready(false, "WaitingForResultArchive", "CouchDB is starting");
        return Ok(Action::requeue(TIER_WAIT));
    }

    if !status.result_archive_registered {
        let ras_port = required_node_port(
            ctx,
            namespace,
            &Tier::Ras.external_service(&name),
            ras::COUCHDB_PORT_NAME,
        )
        .await?;
        let store = ctx.property_stores.for_ecosystem(namespace, &name);
        register_result_archive(store.as_ref(), &store_location("couchdb", spec, ras_port)).await?;
        status.result_archive_registered = true;
    }

    apply(
        ctx,
        namespace,
        ecosystem,
        apiserver::generate(ecosystem, &cps_endpoint),
    )
    .await?;
    if counts.api < required(spec.apiserver.replicas) {
        debug!(ready = counts.api, "API server not ready");
        status.mark_ready(false, "WaitingForApiServer", "API server is starting");
        return Ok(Action::requeue(API_WAIT));
    }

    let api_service = Tier::ApiServer.external_service(&name);
    let http_port = ctx
        .kube
        .service_node_port(namespace, &api_service, apiserver::HTTP_PORT_NAME)
        .await?;
    let urls = api_urls(spec, &api_service, http_port)?;
    status.bootstrap_url = Some(urls.bootstrap);
    status.test_catalog_url = Some(urls.test_catalog.clone());

    apply(ctx, namespace, ecosystem, engines::engine_controller(ecosystem)).await?;
    apply(ctx, namespace, ecosystem, engines::resource_monitor(ecosystem)).await?;
    apply(ctx, namespace, ecosystem, simbank::generate(ecosystem)).await?;
    apply(ctx, namespace, ecosystem, monitoring::generate(ecosystem)).await?;

    let grafana_service = Tier::Grafana.external_service(&name);
    let grafana_port = ctx
        .kube
        .service_node_port(namespace, &grafana_service, monitoring::GRAFANA_PORT_NAME)
        .await?;
    match grafana_url(&name, spec, &grafana_service, grafana_port) {
        Ok(url) => status.grafana_url = Some(url),
        Err(e) => debug!(error = %e, "grafana URL not known yet"),
    }

    if !status.simbank_registered && counts.simbank > 0 {
        register_simbank(ecosystem, ctx, namespace, &urls.test_catalog).await?;
        status.simbank_registered = true;
    }

    if counts.all_ready(spec) {
        if !status.ecosystem_ready {
            info!("ecosystem ready");
        }
        status.mark_ready(true, "EcosystemReady", "all tiers are running");
        Ok(Action::requeue(READY_RESYNC))
    } else {
        status.mark_ready(false, "TiersStarting", "waiting for worker tiers");
        Ok(Action::requeue(NOT_READY_WAIT))
    }
}

/// Define the SIMBANK stream and upload its test catalog
async fn register_simbank(
    ecosystem: &GalasaEcosystem,
    ctx: &Context,
    namespace: &str,
    test_catalog_url: &str,
) -> Result<(), Error> {
    let name = ecosystem.name_any();
    let spec = &ecosystem.spec;
    let service = Tier::Simbank.external_service(&name);

    let stream = SimbankStream {
        test_catalog_url: test_catalog_url.to_string(),
        version: simbank::version(ecosystem).to_string(),
        maven_repository: spec.maven_repository.clone(),
        host: external_host(spec)?,
        telnet_port: required_node_port(ctx, namespace, &service, simbank::TELNET_PORT_NAME)
            .await?,
        webservice_port: required_node_port(
            ctx,
            namespace,
            &service,
            simbank::WEBSERVICE_PORT_NAME,
        )
        .await?,
        database_port: required_node_port(ctx, namespace, &service, simbank::DATABASE_PORT_NAME)
            .await?,
        zosmf_port: required_node_port(ctx, namespace, &service, simbank::ZOSMF_PORT_NAME).await?,
    };

    let store = ctx.property_stores.for_ecosystem(namespace, &name);
    register_simbank_stream(store.as_ref(), &stream).await?;
    seed_catalog(
        ctx.catalog.as_ref(),
        &stream.location(),
        &ctx.testcatalog_fixture,
    )
    .await?;
    info!(location = %stream.location(), "SIMBANK registered");
    Ok(())
}

/// Error policy for the controller
///
/// Every failure is retried after a short delay.
pub fn error_policy(ecosystem: Arc<GalasaEcosystem>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        ecosystem = %ecosystem.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(TIER_WAIT)
}
