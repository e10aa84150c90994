//! Shared setup for the cluster tests

use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, CustomResourceExt};

use galasa_operator::crd::{GalasaEcosystem, GalasaEcosystemSpec};
use galasa_operator::FIELD_MANAGER;

/// Namespace every test works in
pub const TEST_NAMESPACE: &str = "galasa-operator-test";

/// Connect to the cluster, install the CRD and create the test namespace
pub async fn ensure_test_cluster() -> Result<Client, kube::Error> {
    let client = Client::try_default().await?;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        "galasaecosystems.galasa.dev",
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&GalasaEcosystem::crd()),
    )
    .await?;
    // CRDs need a moment before the API server serves them
    tokio::time::sleep(Duration::from_secs(2)).await;

    let namespaces: Api<Namespace> = Api::all(client.clone());
    if namespaces.get_opt(TEST_NAMESPACE).await?.is_none() {
        let ns = Namespace {
            metadata: kube::api::ObjectMeta {
                name: Some(TEST_NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        namespaces.create(&PostParams::default(), &ns).await?;
    }

    Ok(client)
}

/// Minimal ecosystem as an administrator would write it
pub fn sample_ecosystem(name: &str) -> GalasaEcosystem {
    let spec: GalasaEcosystemSpec = serde_json::from_value(serde_json::json!({
        "galasaVersion": "0.30.0",
        "dockerRegistry": "docker.galasa.dev",
        "mavenRepository": "https://repo.maven.apache.org/maven2",
        "externalHostname": "http://127.0.0.1"
    }))
    .expect("sample spec should deserialize");
    let mut eco = GalasaEcosystem::new(name, spec);
    eco.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    eco
}

/// Delete an ecosystem, ignoring whether it existed
pub async fn cleanup_ecosystem(client: &Client, name: &str) {
    let api: Api<GalasaEcosystem> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let _ = api.delete(name, &DeleteParams::default()).await;
}
