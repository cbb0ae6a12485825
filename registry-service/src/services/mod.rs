//! Services module for registry-service.

pub mod credentials;
pub mod database;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod packages;
pub mod repository;
pub mod resolver;
pub mod storage;
pub mod token;

pub use credentials::CredentialStore;
pub use database::Database;
pub use error::{AuthFailure, ServiceError};
pub use manifest::ManifestExtractor;
pub use metrics::{
    get_metrics, init_metrics, record_error, record_grpc_request, record_grpc_request_duration,
    record_publish_outcome,
};
pub use packages::{object_key, Intent, IntentKind, IntentState, PackageStore};
pub use repository::{
    MockPackageRepository, MockUserRepository, PackageRepository, PackageTransaction,
    UserRepository,
};
pub use resolver::{DnsResolver, HostResolver, StaticResolver};
pub use storage::{LocalStorage, MockStorage, S3Storage, Storage};
pub use token::{TokenClaims, TokenError, TokenIssuer};
