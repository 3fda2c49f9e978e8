//! Integration tests for the OpenStack client
//!
//! These tests require a reachable OpenStack cloud.
//! Set OS_COMPUTE_ENDPOINT, OS_NETWORK_ENDPOINT, OS_IMAGE_ENDPOINT and
//! OS_AUTH_TOKEN to run them. OS_TEST_IMAGE and OS_TEST_FLAVOR name a
//! known image and flavor.

use openstack_client::{ComputeClientTrait, Endpoints, InstanceListOpts, OpenStackClient};

fn client_from_env() -> OpenStackClient {
    let endpoints = Endpoints {
        compute: std::env::var("OS_COMPUTE_ENDPOINT")
            .expect("OS_COMPUTE_ENDPOINT environment variable must be set"),
        network: std::env::var("OS_NETWORK_ENDPOINT")
            .expect("OS_NETWORK_ENDPOINT environment variable must be set"),
        image: std::env::var("OS_IMAGE_ENDPOINT")
            .expect("OS_IMAGE_ENDPOINT environment variable must be set"),
    };
    let token = std::env::var("OS_AUTH_TOKEN")
        .expect("OS_AUTH_TOKEN environment variable must be set");

    OpenStackClient::new(endpoints, token).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires a reachable OpenStack cloud
async fn test_list_unknown_instance_is_empty() {
    let client = client_from_env();

    let instances = client
        .list_instances(&InstanceListOpts {
            name: format!("does-not-exist-{}", uuid::Uuid::new_v4()),
            ..Default::default()
        })
        .await
        .expect("Failed to list instances");

    assert!(instances.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_reference_validation() {
    let client = client_from_env();
    let image = std::env::var("OS_TEST_IMAGE").unwrap_or_else(|_| "cirros".to_string());
    let flavor = std::env::var("OS_TEST_FLAVOR").unwrap_or_else(|_| "m1.tiny".to_string());

    client.image_exists(&image).await.expect("image should exist");
    client.flavor_exists(&flavor).await.expect("flavor should exist");

    let missing = client.flavor_exists("no-such-flavor").await.unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
#[ignore]
async fn test_get_missing_instance_is_not_found() {
    let client = client_from_env();

    let err = client
        .get_instance(&uuid::Uuid::new_v4().to_string())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
