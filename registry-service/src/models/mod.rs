//! Domain models for registry-service.

pub mod package;
pub mod user;

pub use package::{Package, PackageDescriptor};
pub use user::{NewUser, User};
