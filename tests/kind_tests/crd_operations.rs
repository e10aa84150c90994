//! Integration tests for CRD operations
//!
//! These tests tell the story of how administrators manage GalasaEcosystem
//! resources through the Kubernetes API.

use kube::api::{Api, PostParams};

use galasa_operator::crd::GalasaEcosystem;

use super::helpers::{cleanup_ecosystem, ensure_test_cluster, sample_ecosystem, TEST_NAMESPACE};

/// Story: An administrator creates an ecosystem with only the required fields
///
/// Every tier the administrator leaves out is filled in by the schema
/// defaults, so a four-line spec describes a complete ecosystem.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_admin_creates_minimal_ecosystem() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<GalasaEcosystem> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-minimal-create";
    cleanup_ecosystem(&client, name).await;

    let created = api
        .create(&PostParams::default(), &sample_ecosystem(name))
        .await
        .expect("failed to create ecosystem");
    assert_eq!(created.metadata.name.as_deref(), Some(name));

    let fetched = api.get(name).await.expect("failed to get ecosystem");
    assert_eq!(fetched.spec.galasa_version, "0.30.0");
    assert_eq!(fetched.spec.propertystore.cluster_size, 1);
    assert_eq!(fetched.spec.apiserver.replicas, 1);
    assert_eq!(fetched.spec.monitoring.total_replicas(), 3);

    cleanup_ecosystem(&client, name).await;
}

/// Story: An administrator sizes the property store for production
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_admin_sizes_property_store_cluster() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<GalasaEcosystem> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-cps-size";
    cleanup_ecosystem(&client, name).await;

    let mut eco = sample_ecosystem(name);
    eco.spec.propertystore.cluster_size = 3;
    eco.spec
        .propertystore
        .init_props
        .insert("framework.resultarchive.store".into(), "".into());
    api.create(&PostParams::default(), &eco)
        .await
        .expect("failed to create ecosystem");

    let fetched = api.get(name).await.expect("failed to get ecosystem");
    assert_eq!(fetched.spec.propertystore.cluster_size, 3);
    assert!(fetched
        .spec
        .propertystore
        .init_props
        .contains_key("framework.resultarchive.store"));

    cleanup_ecosystem(&client, name).await;
}

/// Story: An administrator lists the ecosystems in a namespace
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_admin_lists_ecosystems() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<GalasaEcosystem> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let names = ["test-list-a", "test-list-b"];
    for name in names {
        cleanup_ecosystem(&client, name).await;
        api.create(&PostParams::default(), &sample_ecosystem(name))
            .await
            .expect("failed to create ecosystem");
    }

    let listed = api.list(&Default::default()).await.expect("failed to list");
    let listed: Vec<String> = listed.items.iter().filter_map(|e| e.metadata.name.clone()).collect();
    for name in names {
        assert!(listed.iter().any(|n| n == name), "{name} should be listed");
        cleanup_ecosystem(&client, name).await;
    }
}
