//! gRPC interceptors and metadata helpers for incoming requests.

use tonic::{Request, Status};

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// gRPC metadata key carrying `Bearer <token>` credentials.
pub const AUTHORIZATION_KEY: &str = "authorization";

/// Interceptor that surfaces trace context from incoming requests.
///
/// Reads `traceparent` and `x-request-id` from the metadata and logs them so
/// log lines can be correlated across services.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    if let Some(traceparent) = extract_traceparent(&request) {
        tracing::debug!(traceparent = %traceparent, "Received trace context");
    }

    if let Some(request_id) = extract_request_id(&request) {
        tracing::debug!(request_id = %request_id, "Received request id");
    }

    Ok(request)
}

/// Extract the traceparent header value if present.
pub fn extract_traceparent<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(TRACEPARENT_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract request ID from incoming gRPC request metadata.
pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract the token from an `authorization: Bearer <token>` entry.
///
/// Returns `None` when the entry is missing, not ASCII, or uses another scheme.
pub fn extract_bearer_token<T>(request: &Request<T>) -> Option<String> {
    let value = request.metadata().get(AUTHORIZATION_KEY)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
