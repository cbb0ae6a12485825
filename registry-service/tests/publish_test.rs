//! Integration tests for Publish and the package read RPCs.

mod common;

use common::{
    acme_artifact, artifact_named, harness, harness_with, tarball, token_config, with_bearer,
};
use registry_service::grpc::proto::registry_service_server::RegistryService;
use registry_service::grpc::proto::{
    GetPackageRequest, ListPackagesRequest, PublishRequest, PublishResponse,
};
use registry_service::grpc::WirePolicy;
use registry_service::models::User;
use registry_service::services::TokenIssuer;
use secrecy::Secret;
use tonic::{Code, Request, Status};

fn publish_request(artifact: Vec<u8>) -> Request<PublishRequest> {
    Request::new(PublishRequest { artifact })
}

async fn publish(h: &common::Harness, artifact: Vec<u8>) -> Result<PublishResponse, Status> {
    h.registry
        .publish(publish_request(artifact))
        .await
        .map(|r| r.into_inner())
}

async fn listed_names(h: &common::Harness) -> Vec<String> {
    h.registry
        .list_packages(Request::new(ListPackagesRequest {}))
        .await
        .unwrap()
        .into_inner()
        .packages
        .into_iter()
        .map(|p| p.name)
        .collect()
}

#[tokio::test]
async fn acme_widgets_publishes() {
    let h = harness();

    let response = publish(&h, acme_artifact()).await.unwrap();

    assert!(response.result);
    let package = response.package.expect("package returned");
    assert_eq!(package.name, "acme-widgets");
    assert_eq!(package.object_store_key, "/acme-widgets/artifact");
    assert_eq!(package.object_store_bucket, "mock");
    assert_eq!(package.keywords, vec!["a", "b"]);
    assert!(package.owner_user_id.is_none());
    assert!(h.storage.contains("/acme-widgets/artifact"));
}

#[tokio::test]
async fn published_package_is_readable_and_listed() {
    let h = harness();
    let package = publish(&h, acme_artifact()).await.unwrap().package.unwrap();

    let fetched = h
        .registry
        .get_package(Request::new(GetPackageRequest {
            package_id: package.package_id.clone(),
        }))
        .await
        .unwrap()
        .into_inner()
        .package
        .unwrap();

    assert_eq!(fetched, package);
    assert_eq!(listed_names(&h).await, vec!["acme-widgets"]);
}

#[tokio::test]
async fn bearer_token_records_the_owner() {
    let h = harness();
    let (user_id, token) = h.publisher("ada@example.com").await;

    let package = h
        .registry
        .publish(with_bearer(
            PublishRequest {
                artifact: acme_artifact(),
            },
            &token,
        ))
        .await
        .unwrap()
        .into_inner()
        .package
        .unwrap();

    assert_eq!(package.owner_user_id, Some(user_id.to_string()));
}

#[tokio::test]
async fn duplicate_name_leaves_one_row_and_never_uploads() {
    let h = harness();
    publish(&h, acme_artifact()).await.unwrap();

    let status = publish(&h, acme_artifact()).await.unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(h.packages.len(), 1);
    assert_eq!(h.storage.upload_calls(), 1);
}

#[tokio::test]
async fn duplicate_name_is_already_exists_when_detailed() {
    let h = harness_with(WirePolicy::detailed());
    publish(&h, acme_artifact()).await.unwrap();

    let status = publish(&h, acme_artifact()).await.unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn failed_upload_leaves_no_row() {
    let h = harness();
    h.storage.fail_uploads(true);

    let status = publish(&h, acme_artifact()).await.unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(h.storage.upload_calls(), 1);
    assert!(h.packages.is_empty());
    assert!(listed_names(&h).await.is_empty());
}

#[tokio::test]
async fn failed_upload_is_unavailable_when_detailed() {
    let h = harness_with(WirePolicy::detailed());
    h.storage.fail_uploads(true);

    let status = publish(&h, acme_artifact()).await.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
}

#[tokio::test]
async fn failed_commit_removes_the_uploaded_blob() {
    let h = harness();
    h.packages.fail_next_commit();

    let status = publish(&h, acme_artifact()).await.unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert!(h.packages.is_empty());
    assert_eq!(h.storage.delete_calls(), 1);
    assert!(!h.storage.contains("/acme-widgets/artifact"));
}

#[tokio::test]
async fn artifact_without_manifest_is_rejected_before_upload() {
    let h = harness_with(WirePolicy::detailed());
    let artifact = tarball(&[("README.md", &b"no manifest here"[..])]);

    let status = publish(&h, artifact).await.unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(h.storage.upload_calls(), 0);
}

#[tokio::test]
async fn garbage_bytes_collapse_to_internal() {
    let h = harness();

    let status = publish(&h, b"definitely not gzip".to_vec()).await.unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "Publish failed");
}

#[tokio::test]
async fn incomplete_descriptor_fails_validation() {
    let h = harness_with(WirePolicy::detailed());
    let manifest = "[package]\nname = \"half-done\"\n";
    let artifact = tarball(&[("buff.toml", manifest.as_bytes())]);

    let status = publish(&h, artifact).await.unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(h.packages.is_empty());
}

#[tokio::test]
async fn distinct_names_coexist() {
    let h = harness();
    publish(&h, artifact_named("acme-widgets")).await.unwrap();
    publish(&h, artifact_named("acme-gadgets")).await.unwrap();

    let mut names = listed_names(&h).await;
    names.sort();
    assert_eq!(names, vec!["acme-gadgets", "acme-widgets"]);
    assert_eq!(h.storage.len(), 2);
}

#[tokio::test]
async fn token_signed_with_another_key_is_rejected() {
    let h = harness();
    let mut other = token_config();
    other.signing_key = Secret::new("some-other-signing-key-0123456789abcd".to_string());
    let forged = TokenIssuer::new(&other)
        .issue(&User::new(
            "Mallory".to_string(),
            "mallory@example.com".to_string(),
            "mallory@example.com".to_string(),
            "hash".to_string(),
        ))
        .unwrap();

    let status = h
        .registry
        .publish(with_bearer(
            PublishRequest {
                artifact: acme_artifact(),
            },
            &forged,
        ))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(h.storage.upload_calls(), 0);
}

#[tokio::test]
async fn token_for_unknown_user_is_rejected() {
    let h = harness();
    let ghost = h
        .tokens
        .issue(&User::new(
            "Ghost".to_string(),
            "ghost@example.com".to_string(),
            "ghost@example.com".to_string(),
            "hash".to_string(),
        ))
        .unwrap();

    let status = h
        .registry
        .publish(with_bearer(
            PublishRequest {
                artifact: acme_artifact(),
            },
            &ghost,
        ))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn get_package_checks_the_id() {
    let h = harness();

    let malformed = h
        .registry
        .get_package(Request::new(GetPackageRequest {
            package_id: "not-a-uuid".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(malformed.code(), Code::InvalidArgument);

    let missing = h
        .registry
        .get_package(Request::new(GetPackageRequest {
            package_id: uuid::Uuid::new_v4().to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(missing.code(), Code::NotFound);
}
