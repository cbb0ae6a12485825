//! gRPC utilities shared by the registry services.
//!
//! - Error conversion from `AppError` to `tonic::Status`
//! - Interceptor for trace context propagation
//! - Metadata helpers (request id, bearer credentials)

pub mod error;
pub mod interceptors;

pub use error::IntoStatus;
pub use interceptors::{
    AUTHORIZATION_KEY, REQUEST_ID_KEY, TRACEPARENT_KEY, extract_bearer_token, extract_request_id,
    extract_traceparent, trace_context_interceptor,
};

// Re-export commonly used tonic types
pub use tonic::{Code, Request, Response, Status};
