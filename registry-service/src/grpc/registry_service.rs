//! gRPC implementation of RegistryService.

use service_core::grpc::extract_bearer_token;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::grpc::proto::{
    registry_service_server::RegistryService, DeletePackageRequest, DeletePackageResponse,
    GetPackageRequest, GetPackageResponse, ListPackagesRequest, ListPackagesResponse,
    Package as ProtoPackage, PublishRequest, PublishResponse,
};
use crate::grpc::wire::{observe, service_error, WirePolicy};
use crate::models::{Package, User};
use crate::services::{
    record_publish_outcome, CredentialStore, ManifestExtractor, PackageStore, ServiceError,
    TokenIssuer,
};

impl From<Package> for ProtoPackage {
    fn from(p: Package) -> Self {
        Self {
            package_id: p.package_id.to_string(),
            name: p.name,
            description: p.description,
            homepage: p.homepage,
            repository_url: p.repository_url,
            keywords: p.keywords,
            owner_user_id: p.owner_user_id.map(|id| id.to_string()),
            object_store_bucket: p.object_store_bucket,
            object_store_key: p.object_store_key,
            created_utc: p.created_utc.to_rfc3339(),
        }
    }
}

pub struct RegistryServiceImpl {
    extractor: Arc<ManifestExtractor>,
    packages: Arc<PackageStore>,
    credentials: Arc<CredentialStore>,
    tokens: Arc<TokenIssuer>,
    wire: WirePolicy,
}

impl RegistryServiceImpl {
    pub fn new(
        extractor: Arc<ManifestExtractor>,
        packages: Arc<PackageStore>,
        credentials: Arc<CredentialStore>,
        tokens: Arc<TokenIssuer>,
        wire: WirePolicy,
    ) -> Self {
        Self {
            extractor,
            packages,
            credentials,
            tokens,
            wire,
        }
    }

    /// Resolve the caller from an optional bearer token. A token that is
    /// present but invalid, or names an unknown user, is rejected.
    async fn caller<T>(&self, request: &Request<T>) -> Result<Option<User>, Status> {
        let Some(token) = extract_bearer_token(request) else {
            return Ok(None);
        };

        let claims = self.tokens.validate(&token).map_err(|e| {
            tracing::warn!(error = %e, "Bearer token rejected");
            Status::unauthenticated("Invalid token")
        })?;
        let user_id = claims.user_id().map_err(|e| {
            tracing::warn!(error = %e, "Bearer token subject is not a user id");
            Status::unauthenticated("Invalid token")
        })?;

        match self.credentials.get_by_id(user_id).await {
            Ok(user) => Ok(Some(user)),
            Err(ServiceError::NotFound(_)) => {
                tracing::warn!(user_id = %user_id, "Bearer token names an unknown user");
                Err(Status::unauthenticated("Invalid token"))
            }
            Err(e) => Err(service_error("Authenticate", e)),
        }
    }

    async fn publish_impl(&self, request: Request<PublishRequest>) -> Result<PublishResponse, Status> {
        let owner = self.caller(&request).await?;
        let artifact = request.into_inner().artifact;

        let outcome = match self.extractor.extract(&artifact) {
            Ok(descriptor) => {
                self.packages
                    .publish(descriptor, artifact, owner.as_ref().map(|u| u.user_id))
                    .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(package) => {
                record_publish_outcome("ok");
                Ok(PublishResponse {
                    result: true,
                    package: Some(package.into()),
                })
            }
            Err(e) => {
                record_publish_outcome(e.kind());
                Err(self.wire.publish_error(e))
            }
        }
    }

    async fn delete_impl(
        &self,
        request: Request<DeletePackageRequest>,
    ) -> Result<DeletePackageResponse, Status> {
        let caller = self
            .caller(&request)
            .await?
            .ok_or_else(|| Status::unauthenticated("Bearer token required"))?;
        let package_id = parse_package_id(&request.get_ref().package_id)?;

        let package = self
            .packages
            .get(package_id)
            .await
            .map_err(|e| service_error("DeletePackage", e))?;

        if let Some(owner) = package.owner_user_id {
            if owner != caller.user_id {
                tracing::warn!(
                    package_id = %package_id,
                    user_id = %caller.user_id,
                    "Delete refused for non-owner"
                );
                return Err(Status::permission_denied("Only the owner may delete a package"));
            }
        }

        self.packages
            .delete(&package)
            .await
            .map_err(|e| service_error("DeletePackage", e))?;

        Ok(DeletePackageResponse { deleted: true })
    }
}

fn parse_package_id(raw: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|_| Status::invalid_argument("package_id must be a UUID"))
}

#[tonic::async_trait]
impl RegistryService for RegistryServiceImpl {
    async fn publish(
        &self,
        request: Request<PublishRequest>,
    ) -> Result<Response<PublishResponse>, Status> {
        let started = Instant::now();
        let result = self.publish_impl(request).await;
        observe("Publish", started, &result);
        result.map(Response::new)
    }

    async fn get_package(
        &self,
        request: Request<GetPackageRequest>,
    ) -> Result<Response<GetPackageResponse>, Status> {
        let started = Instant::now();
        let result = match parse_package_id(&request.into_inner().package_id) {
            Ok(id) => self
                .packages
                .get(id)
                .await
                .map(|p| GetPackageResponse {
                    package: Some(p.into()),
                })
                .map_err(|e| service_error("GetPackage", e)),
            Err(status) => Err(status),
        };
        observe("GetPackage", started, &result);
        result.map(Response::new)
    }

    async fn list_packages(
        &self,
        _request: Request<ListPackagesRequest>,
    ) -> Result<Response<ListPackagesResponse>, Status> {
        let started = Instant::now();
        let result = self
            .packages
            .list()
            .await
            .map(|packages| ListPackagesResponse {
                packages: packages.into_iter().map(Into::into).collect(),
            })
            .map_err(|e| service_error("ListPackages", e));
        observe("ListPackages", started, &result);
        result.map(Response::new)
    }

    async fn delete_package(
        &self,
        request: Request<DeletePackageRequest>,
    ) -> Result<Response<DeletePackageResponse>, Status> {
        let started = Instant::now();
        let result = self.delete_impl(request).await;
        observe("DeletePackage", started, &result);
        result.map(Response::new)
    }
}
