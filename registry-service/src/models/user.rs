//! Publisher accounts.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Persisted publisher account. `private_email` is the login identifier.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub full_name: String,
    pub public_email: String,
    pub private_email: String,
    pub password_hash: String,
    pub public_email_verified: bool,
    pub private_email_verified: bool,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Build an unverified account from an already hashed password.
    pub fn new(
        full_name: String,
        public_email: String,
        private_email: String,
        password_hash: String,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            full_name,
            public_email,
            private_email: normalize_identifier(&private_email),
            password_hash,
            public_email_verified: false,
            private_email_verified: false,
            created_utc: Utc::now(),
        }
    }
}

/// Registration input.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "Public email must be a valid email address"))]
    pub public_email: String,
    #[validate(email(message = "Private email must be a valid email address"))]
    pub private_email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub password_confirmation: String,
}

/// Login identifiers compare case-insensitively.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}
