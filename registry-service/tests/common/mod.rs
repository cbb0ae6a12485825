//! Common test utilities for registry-service integration tests.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use registry_service::config::{
    DatabaseConfig, Environment, ManifestConfig, RegistryConfig, StorageBackend, StorageConfig,
    TokenConfig, ValidationConfig, WireConfig,
};
use registry_service::grpc::proto::auth_service_client::AuthServiceClient;
use registry_service::grpc::proto::auth_service_server::AuthService;
use registry_service::grpc::proto::registry_service_client::RegistryServiceClient;
use registry_service::grpc::proto::{LoginRequest, RegisterRequest};
use registry_service::grpc::{AuthServiceImpl, RegistryServiceImpl, WirePolicy};
use registry_service::services::{
    CredentialStore, ManifestExtractor, MockPackageRepository, MockStorage, MockUserRepository,
    PackageStore, StaticResolver, TokenIssuer,
};
use registry_service::startup::Application;
use secrecy::Secret;
use service_core::config::Config as CommonConfig;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;
use tonic::transport::Channel;
use uuid::Uuid;

static INIT: Once = Once::new();

pub const PASSWORD: &str = "correct-horse-battery";

pub const ACME_MANIFEST: &str = r#"
[package]
name = "acme-widgets"
description = "d"
homepage = "https://acme.example"
repository_url = "https://github.com/acme/widgets"
keywords = ["a", "b"]
"#;

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,registry_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn token_config() -> TokenConfig {
    TokenConfig {
        signing_key: Secret::new("integration-test-signing-key-0123456789".to_string()),
        issuer: "registry-service-test".to_string(),
        audience: "localhost".to_string(),
        expiry_days: 7,
    }
}

fn storage_config(local_path: PathBuf) -> StorageConfig {
    StorageConfig {
        backend: StorageBackend::Local,
        bucket: "buff-artifacts-test".to_string(),
        local_path,
        s3_region: None,
        s3_endpoint: None,
        timeout: Some(Duration::from_secs(5)),
    }
}

/// Services wired to in-memory collaborators.
pub struct Harness {
    pub auth: AuthServiceImpl,
    pub registry: RegistryServiceImpl,
    pub users: Arc<MockUserRepository>,
    pub packages: MockPackageRepository,
    pub storage: Arc<MockStorage>,
    pub tokens: Arc<TokenIssuer>,
}

pub fn harness() -> Harness {
    harness_with(WirePolicy::default())
}

pub fn harness_with(wire: WirePolicy) -> Harness {
    init_tracing();

    let users = Arc::new(MockUserRepository::new());
    let packages = MockPackageRepository::new();
    let storage = Arc::new(MockStorage::new());

    let credentials = Arc::new(CredentialStore::new(users.clone()));
    let tokens = Arc::new(TokenIssuer::new(&token_config()));
    let store = Arc::new(PackageStore::new(
        Arc::new(packages.clone()),
        storage.clone(),
        Arc::new(StaticResolver::accept_all()),
        &storage_config(PathBuf::from("unused")),
    ));

    Harness {
        auth: AuthServiceImpl::new(credentials.clone(), tokens.clone(), wire),
        registry: RegistryServiceImpl::new(
            Arc::new(ManifestExtractor::new(&ManifestConfig::default())),
            store,
            credentials,
            tokens.clone(),
            wire,
        ),
        users,
        packages,
        storage,
        tokens,
    }
}

impl Harness {
    /// Register a publisher and log in, returning its id and bearer token.
    pub async fn publisher(&self, email: &str) -> (Uuid, String) {
        let registered = self
            .auth
            .register(tonic::Request::new(register_request(email)))
            .await
            .expect("register failed")
            .into_inner();

        let login = self
            .auth
            .login(tonic::Request::new(LoginRequest {
                email: email.to_string(),
                password: PASSWORD.to_string(),
            }))
            .await
            .expect("login failed")
            .into_inner();

        (registered.user_id.parse().unwrap(), login.token)
    }
}

pub fn register_request(email: &str) -> RegisterRequest {
    RegisterRequest {
        full_name: "Test Publisher".to_string(),
        public_email: "public@example.com".to_string(),
        private_email: email.to_string(),
        password: PASSWORD.to_string(),
        password_confirmation: PASSWORD.to_string(),
    }
}

/// Build a gzip tarball holding the given files.
pub fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn acme_artifact() -> Vec<u8> {
    tarball(&[
        ("README.md", &b"# acme widgets"[..]),
        ("buff.toml", ACME_MANIFEST.as_bytes()),
    ])
}

/// An artifact whose manifest differs from the acme one only by name.
pub fn artifact_named(name: &str) -> Vec<u8> {
    let manifest = ACME_MANIFEST.replace("acme-widgets", name);
    tarball(&[("buff.toml", manifest.as_bytes())])
}

pub fn with_bearer<T>(message: T, token: &str) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    request.metadata_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );
    request
}

pub struct TestApp {
    pub auth_client: AuthServiceClient<Channel>,
    pub registry_client: RegistryServiceClient<Channel>,
    pub http_port: u16,
    pub grpc_port: u16,
    pub storage_dir: tempfile::TempDir,
}

fn test_config(storage_dir: &tempfile::TempDir) -> RegistryConfig {
    let database_url =
        std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");

    RegistryConfig {
        common: CommonConfig { port: 0 },
        environment: Environment::Dev,
        service_name: "registry-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 2,
            min_connections: 1,
        },
        storage: storage_config(storage_dir.path().to_path_buf()),
        token: token_config(),
        manifest: ManifestConfig::default(),
        validation: ValidationConfig {
            repository_host_check: false,
        },
        wire: WireConfig::default(),
    }
}

/// Start the full service against PostgreSQL with migrations applied.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let storage_dir = tempfile::tempdir().expect("Failed to create storage dir");
    let app = Application::build(test_config(&storage_dir))
        .await
        .expect("Failed to build application");

    let http_port = app.http_port();
    let grpc_port = app.grpc_port();
    let grpc_addr = format!("http://127.0.0.1:{}", grpc_port);

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let channel = {
        let mut attempts = 0;
        loop {
            match Channel::from_shared(grpc_addr.clone())
                .expect("valid endpoint")
                .connect()
                .await
            {
                Ok(channel) => break channel,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
            }
        }
    };

    TestApp {
        auth_client: AuthServiceClient::new(channel.clone()),
        registry_client: RegistryServiceClient::new(channel),
        http_port,
        grpc_port,
        storage_dir,
    }
}
