//! Registry Service - package artifact registry backend.
//!
//! Publishers log in over gRPC, receive a bearer token and upload gzip
//! tarballs. Each artifact's `buff.toml` becomes a package row in PostgreSQL
//! while the bytes go to an object store, kept consistent by
//! [`services::PackageStore`].

pub mod config;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
