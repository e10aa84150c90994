//! Integration tests for the reconciler against a live API server
//!
//! No Galasa images need to be pullable: these stories stop at the first
//! tier gate, before any pod has to run.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;

use galasa_operator::controller::{reconcile, Context};
use galasa_operator::crd::GalasaEcosystem;

use super::helpers::{cleanup_ecosystem, ensure_test_cluster, sample_ecosystem, TEST_NAMESPACE};

/// Story: A new ecosystem gets its property store and waits for etcd
///
/// Expected behavior:
/// - The CPS StatefulSet and both CPS services exist, owned by the ecosystem
/// - Nothing past the property store has been created
/// - Status reports the ecosystem as not ready
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_new_ecosystem_creates_property_store_first() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<GalasaEcosystem> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-lifecycle";
    cleanup_ecosystem(&client, name).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let created = api
        .create(&PostParams::default(), &sample_ecosystem(name))
        .await
        .expect("failed to create ecosystem");

    let ctx = Arc::new(
        Context::builder(client.clone())
            .build()
            .expect("failed to build context"),
    );
    let action = reconcile(Arc::new(created), ctx)
        .await
        .expect("reconcile should succeed");
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let cps = statefulsets
        .get(&format!("{name}-cps"))
        .await
        .expect("CPS StatefulSet should exist");
    assert_eq!(cps.spec.and_then(|s| s.replicas), Some(1));
    assert!(cps
        .metadata
        .owner_references
        .unwrap_or_default()
        .iter()
        .any(|o| o.kind == "GalasaEcosystem" && o.name == name));
    assert!(statefulsets
        .get_opt(&format!("{name}-ras"))
        .await
        .expect("lookup should succeed")
        .is_none());

    let services: Api<Service> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    for svc in ["cps-internal-service", "cps-external-service"] {
        assert!(services
            .get_opt(&format!("{name}-{svc}"))
            .await
            .expect("lookup should succeed")
            .is_some());
    }

    let fetched = api.get(name).await.expect("failed to get ecosystem");
    let status = fetched.status.expect("status should be written");
    assert!(!status.ecosystem_ready);
    assert!(!status.property_store_seeded);

    cleanup_ecosystem(&client, name).await;
}
