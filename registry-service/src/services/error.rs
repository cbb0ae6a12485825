use service_core::error::AppError;
use thiserror::Error;

use crate::services::token::TokenError;

/// Why a login attempt failed. Kept for logs; callers only see
/// `Invalid credentials`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    UnknownIdentifier,
    WrongPassword,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::UnknownIdentifier => "unknown_identifier",
            AuthFailure::WrongPassword => "wrong_password",
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{0} already exists")]
    Uniqueness(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Artifact extraction failed: {0}")]
    Extraction(anyhow::Error),

    #[error("Manifest could not be parsed: {0}")]
    ManifestParse(anyhow::Error),

    #[error("Object storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Invalid token: {0}")]
    TokenInvalid(#[from] TokenError),

    #[error("Invalid credentials")]
    Authentication(AuthFailure),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::Uniqueness(_) => "uniqueness",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Extraction(_) => "extraction",
            ServiceError::ManifestParse(_) => "manifest_parse",
            ServiceError::Storage(_) => "storage",
            ServiceError::TokenInvalid(_) => "token_invalid",
            ServiceError::Authentication(_) => "authentication",
            ServiceError::Database(_) => "database",
            ServiceError::Internal(_) => "internal",
        }
    }
}

impl From<toml::de::Error> for ServiceError {
    fn from(err: toml::de::Error) -> Self {
        ServiceError::ManifestParse(anyhow::Error::new(err))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => AppError::ValidationError(e),
            ServiceError::Uniqueness(what) => {
                AppError::Conflict(anyhow::anyhow!("{} already exists", what))
            }
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Extraction(e) => {
                AppError::BadRequest(anyhow::anyhow!("Artifact extraction failed: {}", e))
            }
            ServiceError::ManifestParse(e) => {
                AppError::BadRequest(anyhow::anyhow!("Manifest could not be parsed: {}", e))
            }
            ServiceError::Storage(e) => AppError::StorageError(e),
            ServiceError::TokenInvalid(e) => AppError::InvalidToken(anyhow::Error::new(e)),
            ServiceError::Authentication(_) => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
