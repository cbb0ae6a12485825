//! Integration tests for DeletePackage.

mod common;

use common::{acme_artifact, harness, with_bearer, Harness};
use registry_service::grpc::proto::registry_service_server::RegistryService;
use registry_service::grpc::proto::{
    DeletePackageRequest, GetPackageRequest, Package, PublishRequest,
};
use tonic::{Code, Request};

async fn publish_as(h: &Harness, token: &str) -> Package {
    h.registry
        .publish(with_bearer(
            PublishRequest {
                artifact: acme_artifact(),
            },
            token,
        ))
        .await
        .unwrap()
        .into_inner()
        .package
        .unwrap()
}

fn delete_request(package_id: &str, token: &str) -> Request<DeletePackageRequest> {
    with_bearer(
        DeletePackageRequest {
            package_id: package_id.to_string(),
        },
        token,
    )
}

async fn fetch(h: &Harness, package_id: &str) -> Result<Package, tonic::Status> {
    h.registry
        .get_package(Request::new(GetPackageRequest {
            package_id: package_id.to_string(),
        }))
        .await
        .map(|r| r.into_inner().package.unwrap())
}

#[tokio::test]
async fn owner_can_delete() {
    let h = harness();
    let (_, token) = h.publisher("ada@example.com").await;
    let package = publish_as(&h, &token).await;

    let response = h
        .registry
        .delete_package(delete_request(&package.package_id, &token))
        .await
        .unwrap()
        .into_inner();

    assert!(response.deleted);
    assert!(h.packages.is_empty());
    assert!(!h.storage.contains("/acme-widgets/artifact"));
    assert_eq!(
        fetch(&h, &package.package_id).await.unwrap_err().code(),
        Code::NotFound
    );
}

#[tokio::test]
async fn delete_requires_a_token() {
    let h = harness();
    let (_, token) = h.publisher("ada@example.com").await;
    let package = publish_as(&h, &token).await;

    let status = h
        .registry
        .delete_package(Request::new(DeletePackageRequest {
            package_id: package.package_id.clone(),
        }))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(h.packages.len(), 1);
}

#[tokio::test]
async fn other_publishers_cannot_delete() {
    let h = harness();
    let (_, owner) = h.publisher("ada@example.com").await;
    let (_, intruder) = h.publisher("bob@example.com").await;
    let package = publish_as(&h, &owner).await;

    let status = h
        .registry
        .delete_package(delete_request(&package.package_id, &intruder))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::PermissionDenied);
    assert_eq!(h.storage.delete_calls(), 0);
    assert_eq!(fetch(&h, &package.package_id).await.unwrap(), package);
}

#[tokio::test]
async fn failed_blob_delete_keeps_the_package_intact() {
    let h = harness();
    let (_, token) = h.publisher("ada@example.com").await;
    let package = publish_as(&h, &token).await;
    h.storage.fail_deletes(true);

    let status = h
        .registry
        .delete_package(delete_request(&package.package_id, &token))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(h.storage.delete_calls(), 1);
    assert!(h.storage.contains("/acme-widgets/artifact"));
    assert_eq!(fetch(&h, &package.package_id).await.unwrap(), package);
}

#[tokio::test]
async fn failed_commit_puts_the_artifact_back() {
    let h = harness();
    let (_, token) = h.publisher("ada@example.com").await;
    let package = publish_as(&h, &token).await;
    h.packages.fail_next_commit();

    let status = h
        .registry
        .delete_package(delete_request(&package.package_id, &token))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(h.storage.delete_calls(), 1);
    assert!(h.storage.contains("/acme-widgets/artifact"));
    assert_eq!(fetch(&h, &package.package_id).await.unwrap(), package);
}

#[tokio::test]
async fn unknown_package_is_not_found() {
    let h = harness();
    let (_, token) = h.publisher("ada@example.com").await;

    let status = h
        .registry
        .delete_package(delete_request(&uuid::Uuid::new_v4().to_string(), &token))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn malformed_id_is_invalid_argument() {
    let h = harness();
    let (_, token) = h.publisher("ada@example.com").await;

    let status = h
        .registry
        .delete_package(delete_request("42", &token))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
}
