//! Application startup and lifecycle management.

use crate::config::RegistryConfig;
use crate::grpc::{
    proto::{
        auth_service_server::AuthServiceServer, registry_service_server::RegistryServiceServer,
        FILE_DESCRIPTOR_SET,
    },
    trace_context_interceptor, AuthServiceImpl, RegistryServiceImpl, WirePolicy,
};
use crate::services::{
    get_metrics, init_metrics, storage, CredentialStore, Database, DnsResolver, HostResolver,
    ManifestExtractor, PackageStore, StaticResolver, Storage, TokenIssuer,
};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Everything the gRPC services share.
#[derive(Clone)]
pub struct AppState {
    pub config: RegistryConfig,
    pub db: Arc<Database>,
    pub credentials: Arc<CredentialStore>,
    pub tokens: Arc<TokenIssuer>,
    pub extractor: Arc<ManifestExtractor>,
    pub packages: Arc<PackageStore>,
}

#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
}

/// Liveness probe.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "registry-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "registry-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness probe.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    state: AppState,
}

impl Application {
    pub async fn build(config: RegistryConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build without running migrations, for harnesses that apply them first.
    pub async fn build_without_migrations(config: RegistryConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: RegistryConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }
        let db = Arc::new(db);

        let object_store: Arc<dyn Storage> =
            Arc::from(storage::from_config(&config.storage).await.map_err(|e| {
                tracing::error!(error = %e, "Failed to initialise object storage");
                AppError::from(e)
            })?);

        let resolver: Arc<dyn HostResolver> = if config.validation.repository_host_check {
            Arc::new(DnsResolver)
        } else {
            tracing::warn!("Repository host resolution disabled");
            Arc::new(StaticResolver::accept_all())
        };

        let state = AppState {
            credentials: Arc::new(CredentialStore::new(db.clone())),
            tokens: Arc::new(TokenIssuer::new(&config.token)),
            extractor: Arc::new(ManifestExtractor::new(&config.manifest)),
            packages: Arc::new(PackageStore::new(
                db.clone(),
                object_store,
                resolver,
                &config.storage,
            )),
            db,
            config: config.clone(),
        };

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.common.grpc_port()));
        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            grpc_port = grpc_port,
            bucket = %config.storage.bucket,
            "Registry service listeners bound"
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            state,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn db(&self) -> &Database {
        &self.state.db
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(HealthState {
                db: self.state.db.clone(),
            });

        let wire = WirePolicy::new(&self.state.config.wire);
        let auth_service = AuthServiceImpl::new(
            self.state.credentials.clone(),
            self.state.tokens.clone(),
            wire,
        );
        let registry_service = RegistryServiceImpl::new(
            self.state.extractor.clone(),
            self.state.packages.clone(),
            self.state.credentials.clone(),
            self.state.tokens.clone(),
            wire,
        );

        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<AuthServiceServer<AuthServiceImpl>>()
            .await;
        health_reporter
            .set_serving::<RegistryServiceServer<RegistryServiceImpl>>()
            .await;

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(grpc_trace_layer)
            .add_service(grpc_health_service)
            .add_service(reflection_service)
            .add_service(AuthServiceServer::with_interceptor(
                auth_service,
                trace_context_interceptor,
            ))
            .add_service(RegistryServiceServer::with_interceptor(
                registry_service,
                trace_context_interceptor,
            ))
            .serve_with_incoming(incoming);

        tracing::info!(
            service = "registry-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            "Service ready to accept connections"
        );

        tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server error");
                    return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
                }
            }
            result = grpc_server => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "gRPC server error");
                    return Err(std::io::Error::other(format!("gRPC server error: {}", e)));
                }
            }
        }

        Ok(())
    }
}
