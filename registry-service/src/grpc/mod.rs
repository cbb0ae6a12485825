//! gRPC module for registry-service.

mod auth_service;
mod registry_service;
pub mod wire;

pub use auth_service::AuthServiceImpl;
pub use registry_service::RegistryServiceImpl;
pub use service_core::grpc::trace_context_interceptor;
pub use wire::WirePolicy;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("buff.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("registry_descriptor");
}
