use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::models::user::normalize_identifier;
use crate::models::{NewUser, User};
use crate::services::error::{AuthFailure, ServiceError};
use crate::services::repository::UserRepository;
use crate::utils::password::{hash_password, verify_password, Password, PasswordHashString};

/// Hash checked when the identifier is unknown, so both login failures cost
/// one Argon2 verification.
static DUMMY_HASH: Lazy<Option<PasswordHashString>> = Lazy::new(|| {
    hash_password(&Password::new("buff-dummy-password".to_string()))
        .map_err(|e| warn!(error = %e, "Failed to prepare dummy password hash"))
        .ok()
});

/// Publisher accounts: registration, lookup and password checks.
#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserRepository>,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    #[instrument(skip(self, new_user))]
    pub async fn create_user(&self, new_user: NewUser) -> Result<User, ServiceError> {
        new_user.validate()?;

        let identifier = normalize_identifier(&new_user.private_email);
        if self.users.find_user_by_identifier(&identifier).await?.is_some() {
            return Err(ServiceError::Uniqueness(format!("User '{}'", identifier)));
        }

        let password_hash = hash_password(&Password::new(new_user.password))?;
        let user = User::new(
            new_user.full_name,
            new_user.public_email,
            identifier,
            password_hash.into_string(),
        );

        // A concurrent registration can still win on the unique index.
        self.users.insert_user(&user).await?;

        info!(user_id = %user.user_id, "User registered");
        Ok(user)
    }

    #[instrument(skip(self, identifier))]
    pub async fn get_by_identifier(&self, identifier: &str) -> Result<User, ServiceError> {
        self.users
            .find_user_by_identifier(&normalize_identifier(identifier))
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_by_id(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.users
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
    pub fn verify_password(&self, user: &User, candidate: &str) -> Result<bool, ServiceError> {
        let matches = verify_password(
            &Password::new(candidate.to_string()),
            &PasswordHashString::new(user.password_hash.clone()),
        )?;
        Ok(matches)
    }

    /// Look up and check credentials. Both failure causes surface as the
    /// same `Authentication` error.
    #[instrument(skip(self, identifier, password))]
    pub async fn authenticate(&self, identifier: &str, password: &str) -> Result<User, ServiceError> {
        let user = match self.get_by_identifier(identifier).await {
            Ok(user) => user,
            Err(ServiceError::NotFound(_)) => {
                if let Some(hash) = &*DUMMY_HASH {
                    let _ = verify_password(&Password::new(password.to_string()), hash);
                }
                warn!(reason = AuthFailure::UnknownIdentifier.as_str(), "Login rejected");
                return Err(ServiceError::Authentication(AuthFailure::UnknownIdentifier));
            }
            Err(e) => return Err(e),
        };

        if !self.verify_password(&user, password)? {
            warn!(
                user_id = %user.user_id,
                reason = AuthFailure::WrongPassword.as_str(),
                "Login rejected"
            );
            return Err(ServiceError::Authentication(AuthFailure::WrongPassword));
        }

        Ok(user)
    }
}
