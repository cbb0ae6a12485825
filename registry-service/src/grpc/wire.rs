//! How service failures are presented to gRPC callers.
//!
//! Every failure is logged with its full kind first. By default Publish
//! reports `INTERNAL` and Login reports `UNAUTHENTICATED` regardless of the
//! cause; `WIRE_DETAILED_ERRORS=true` maps each kind to its own status.

use service_core::error::AppError;
use service_core::grpc::IntoStatus;
use std::time::Instant;
use tonic::Status;

use crate::config::WireConfig;
use crate::services::{
    record_error, record_grpc_request, record_grpc_request_duration, ServiceError,
};

pub const INVALID_CREDENTIALS: &str = "Invalid credentials";

#[derive(Debug, Clone, Copy, Default)]
pub struct WirePolicy {
    detailed: bool,
}

impl WirePolicy {
    pub fn new(config: &WireConfig) -> Self {
        Self {
            detailed: config.detailed_errors,
        }
    }

    pub fn detailed() -> Self {
        Self { detailed: true }
    }

    pub fn publish_error(&self, err: ServiceError) -> Status {
        log_failure("Publish", &err);
        if self.detailed {
            AppError::from(err).into_status()
        } else {
            Status::internal("Publish failed")
        }
    }

    pub fn login_error(&self, err: ServiceError) -> Status {
        log_failure("Login", &err);
        match err {
            ServiceError::Authentication(_) => Status::unauthenticated(INVALID_CREDENTIALS),
            other if self.detailed => AppError::from(other).into_status(),
            _ => Status::unauthenticated(INVALID_CREDENTIALS),
        }
    }
}

/// Full status mapping for the lookup and account RPCs.
pub fn service_error(method: &str, err: ServiceError) -> Status {
    log_failure(method, &err);
    AppError::from(err).into_status()
}

fn log_failure(method: &str, err: &ServiceError) {
    record_error(err.kind());
    match err {
        ServiceError::Database(_) | ServiceError::Internal(_) | ServiceError::Storage(_) => {
            tracing::error!(method = method, error_kind = err.kind(), error = %err, "Request failed")
        }
        _ => tracing::warn!(method = method, error_kind = err.kind(), error = %err, "Request failed"),
    }
}

/// Record count and latency for one RPC.
pub fn observe<T>(method: &str, started: Instant, result: &Result<T, Status>) {
    let status = match result {
        Ok(_) => "ok".to_string(),
        Err(status) => format!("{:?}", status.code()).to_lowercase(),
    };
    record_grpc_request(method, &status);
    record_grpc_request_duration(method, started.elapsed().as_secs_f64());
}
