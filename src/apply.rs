//! Idempotent applier for generated objects
//!
//! `ensure` creates an object when it is missing and otherwise only corrects
//! the replica count of workloads. Any other drift is left alone.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::resources::{DesiredResource, ResourceKind};
use crate::Error;

/// What the cluster currently holds for a generated object
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveResource {
    /// Replica count for workloads
    pub replicas: Option<i32>,
}

/// Result of a single `ensure`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object did not exist and was created
    Created,
    /// The workload existed with a different replica count
    Scaled {
        /// Replicas before the patch
        from: Option<i32>,
        /// Replicas after the patch
        to: i32,
    },
    /// Nothing to do
    Unchanged,
}

/// Storage operations the applier needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn lookup(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<LiveResource>, Error>;

    /// Create an object exactly as generated
    async fn create(&self, namespace: &str, resource: &DesiredResource) -> Result<(), Error>;

    /// Set `spec.replicas` on a Deployment or StatefulSet
    async fn set_replicas(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error>;
}

/// Make a generated object exist with the desired replica count
pub async fn ensure(
    store: &dyn ResourceStore,
    namespace: &str,
    desired: &DesiredResource,
) -> Result<ApplyOutcome, Error> {
    let kind = desired.kind();
    let name = desired.name();

    let Some(live) = store.lookup(namespace, kind, name).await? else {
        store.create(namespace, desired).await?;
        debug!(%kind, resource = name, namespace, "created");
        return Ok(ApplyOutcome::Created);
    };

    match desired.replicas() {
        Some(want) if live.replicas != Some(want) => {
            store.set_replicas(namespace, kind, name, want).await?;
            info!(%kind, resource = name, from = ?live.replicas, to = want, "scaled");
            Ok(ApplyOutcome::Scaled {
                from: live.replicas,
                to: want,
            })
        }
        _ => Ok(ApplyOutcome::Unchanged),
    }
}

/// Attach the owner reference to every object and ensure each in order
pub async fn ensure_all(
    store: &dyn ResourceStore,
    namespace: &str,
    owner: Option<&OwnerReference>,
    resources: Vec<DesiredResource>,
) -> Result<Vec<ApplyOutcome>, Error> {
    let mut outcomes = Vec::with_capacity(resources.len());
    for resource in resources {
        let resource = match owner {
            Some(owner) => resource.owned_by(owner),
            None => resource,
        };
        outcomes.push(ensure(store, namespace, &resource).await?);
    }
    Ok(outcomes)
}

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeResourceStore {
    client: Client,
    field_manager: String,
}

impl KubeResourceStore {
    /// Create a store writing with the given field manager
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn post<K>(&self, namespace: &str, object: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api::<K>(namespace).create(&params, object).await?;
        Ok(())
    }

    async fn scale<K>(&self, namespace: &str, name: &str, replicas: i32) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.api::<K>(namespace)
            .patch(
                name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

fn exists<K>(object: Option<K>) -> Option<LiveResource> {
    object.map(|_| LiveResource::default())
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn lookup(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<LiveResource>, Error> {
        Ok(match kind {
            ResourceKind::ConfigMap => exists(self.get_opt::<ConfigMap>(namespace, name).await?),
            ResourceKind::Service => exists(self.get_opt::<Service>(namespace, name).await?),
            ResourceKind::PersistentVolumeClaim => {
                exists(self.get_opt::<PersistentVolumeClaim>(namespace, name).await?)
            }
            ResourceKind::Ingress => exists(self.get_opt::<Ingress>(namespace, name).await?),
            ResourceKind::Deployment => self
                .get_opt::<Deployment>(namespace, name)
                .await?
                .map(|d| LiveResource {
                    replicas: d.spec.and_then(|s| s.replicas),
                }),
            ResourceKind::StatefulSet => self
                .get_opt::<StatefulSet>(namespace, name)
                .await?
                .map(|s| LiveResource {
                    replicas: s.spec.and_then(|s| s.replicas),
                }),
        })
    }

    async fn create(&self, namespace: &str, resource: &DesiredResource) -> Result<(), Error> {
        match resource {
            DesiredResource::ConfigMap(o) => self.post(namespace, o).await,
            DesiredResource::Service(o) => self.post(namespace, o).await,
            DesiredResource::PersistentVolumeClaim(o) => self.post(namespace, o).await,
            DesiredResource::Deployment(o) => self.post(namespace, o).await,
            DesiredResource::StatefulSet(o) => self.post(namespace, o).await,
            DesiredResource::Ingress(o) => self.post(namespace, o).await,
        }
    }

    async fn set_replicas(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        match kind {
            ResourceKind::Deployment => self.scale::<Deployment>(namespace, name, replicas).await,
            ResourceKind::StatefulSet => self.scale::<StatefulSet>(namespace, name, replicas).await,
            other => Err(Error::validation(format!("{other} {name} has no replica count"))),
        }
    }
}
