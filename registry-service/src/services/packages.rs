//! Atomic publish/delete across the relational store and the object store.
//!
//! Neither side can join the other's transaction, so every publish and delete
//! is tracked as an [`Intent`]:
//!
//! ```text
//! Pending --(blob written/removed)--> Stored --(row committed)--> Committed
//!    |                                   |
//!    +--(nothing applied)--> RolledBack  +--(commit failed)--> Failed
//! ```
//!
//! The relational transaction stays open while the object store is touched.
//! If the object store fails, the transaction is rolled back and nothing is
//! left behind.
//!
//! A commit error is checked against the committed table before anything is
//! undone. A publish whose row did land is reported as published. A key owned
//! by another committed row is never removed. Otherwise the blob is removed
//! best effort. A delete snapshots the artifact first and puts it back if its
//! row survived. Anything left inconsistent is logged at `error` with its key
//! so an orphan sweep can find it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::config::StorageConfig;
use crate::models::{Package, PackageDescriptor};
use crate::services::error::ServiceError;
use crate::services::metrics::{record_intent_transition, STORAGE_CALL_DURATION};
use crate::services::repository::{PackageRepository, PackageTransaction};
use crate::services::resolver::HostResolver;
use crate::services::storage::Storage;

/// Object-store key for a package's artifact.
pub fn object_key(name: &str) -> String {
    format!("/{}/artifact", name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Publish,
    Delete,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Publish => "publish",
            IntentKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentState {
    /// Row change staged in an open transaction; object store untouched.
    Pending,
    /// Object-store half applied; row change still uncommitted.
    Stored,
    Committed,
    /// Transaction rolled back before the object store changed.
    RolledBack,
    /// Object store changed but the row change did not commit.
    Failed,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::Pending => "pending",
            IntentState::Stored => "stored",
            IntentState::Committed => "committed",
            IntentState::RolledBack => "rolled_back",
            IntentState::Failed => "failed",
        }
    }

    pub fn can_advance_to(self, next: IntentState) -> bool {
        matches!(
            (self, next),
            (IntentState::Pending, IntentState::Stored)
                | (IntentState::Pending, IntentState::RolledBack)
                | (IntentState::Stored, IntentState::Committed)
                | (IntentState::Stored, IntentState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IntentState::Committed | IntentState::RolledBack | IntentState::Failed
        )
    }
}

/// One publish or delete attempt.
#[derive(Debug, Clone)]
pub struct Intent {
    pub kind: IntentKind,
    pub package_name: String,
    pub object_key: String,
    state: IntentState,
}

impl Intent {
    pub fn new(kind: IntentKind, package_name: &str, object_key: &str) -> Self {
        let intent = Self {
            kind,
            package_name: package_name.to_string(),
            object_key: object_key.to_string(),
            state: IntentState::Pending,
        };
        intent.record();
        intent
    }

    pub fn state(&self) -> IntentState {
        self.state
    }

    /// Move to `next`. Illegal transitions are an internal error.
    pub fn advance(&mut self, next: IntentState) -> Result<(), ServiceError> {
        if !self.state.can_advance_to(next) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Illegal {} intent transition {} -> {} for '{}'",
                self.kind.as_str(),
                self.state.as_str(),
                next.as_str(),
                self.package_name
            )));
        }
        self.state = next;
        self.record();
        Ok(())
    }

    fn record(&self) {
        record_intent_transition(self.kind.as_str(), self.state.as_str());
        match self.state {
            IntentState::Failed => error!(
                kind = self.kind.as_str(),
                state = self.state.as_str(),
                package = %self.package_name,
                object_key = %self.object_key,
                "Intent failed after object store change"
            ),
            _ => info!(
                kind = self.kind.as_str(),
                state = self.state.as_str(),
                package = %self.package_name,
                object_key = %self.object_key,
                "Intent transition"
            ),
        }
    }
}

/// Coordinates package rows with their stored artifacts.
#[derive(Clone)]
pub struct PackageStore {
    repository: Arc<dyn PackageRepository>,
    storage: Arc<dyn Storage>,
    resolver: Arc<dyn HostResolver>,
    storage_timeout: Option<Duration>,
}

impl PackageStore {
    pub fn new(
        repository: Arc<dyn PackageRepository>,
        storage: Arc<dyn Storage>,
        resolver: Arc<dyn HostResolver>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            repository,
            storage,
            resolver,
            storage_timeout: config.timeout,
        }
    }

    /// Field validation plus a resolvable repository host.
    pub async fn validate(&self, descriptor: &PackageDescriptor) -> Result<(), ServiceError> {
        descriptor.validate()?;

        let host = descriptor
            .repository_host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .unwrap_or_default();
        if !self.resolver.resolves(&host).await {
            let mut errors = ValidationErrors::new();
            errors.add(
                "repository_url",
                ValidationError::new("unresolvable_host")
                    .with_message(format!("Repository host '{}' does not resolve", host).into()),
            );
            return Err(ServiceError::Validation(errors));
        }

        Ok(())
    }

    #[instrument(skip(self, descriptor, artifact), fields(name = %descriptor.name, artifact_bytes = artifact.len()))]
    pub async fn publish(
        &self,
        descriptor: PackageDescriptor,
        artifact: Vec<u8>,
        owner: Option<Uuid>,
    ) -> Result<Package, ServiceError> {
        self.validate(&descriptor).await?;

        let key = object_key(&descriptor.name);
        let package = Package::new(
            descriptor,
            owner,
            self.storage.bucket().to_string(),
            key.clone(),
        );
        let mut intent = Intent::new(IntentKind::Publish, &package.name, &key);

        let mut tx = self.repository.begin().await?;

        let staged = match tx.name_exists(&package.name).await {
            Ok(false) => tx.insert_package(&package).await,
            Ok(true) => Err(ServiceError::Uniqueness(format!(
                "Package '{}'",
                package.name
            ))),
            Err(e) => Err(e),
        };
        if let Err(e) = staged {
            return Err(abandon(tx, &mut intent, e).await);
        }

        if let Err(e) = self.timed("upload", &key, self.storage.upload(&key, artifact)).await {
            return Err(abandon(tx, &mut intent, e).await);
        }
        intent.advance(IntentState::Stored)?;

        if let Err(e) = tx.commit().await {
            self.settle_failed_publish(&package, &mut intent, e).await?;
            return Ok(package);
        }
        intent.advance(IntentState::Committed)?;

        info!(package_id = %package.package_id, object_key = %key, "Package published");
        Ok(package)
    }

    /// Decide what a publish commit error left behind. `Ok` means the row
    /// landed after all.
    async fn settle_failed_publish(
        &self,
        package: &Package,
        intent: &mut Intent,
        cause: ServiceError,
    ) -> Result<(), ServiceError> {
        let key = &package.object_store_key;

        match self.repository.find_package_by_name(&package.name).await {
            Ok(Some(row)) if row.package_id == package.package_id => {
                intent.advance(IntentState::Committed)?;
                warn!(
                    package_id = %package.package_id,
                    error = %cause,
                    "Commit reported failure but the row is present"
                );
                return Ok(());
            }
            Ok(Some(row)) => {
                intent.advance(IntentState::Failed)?;
                warn!(
                    object_key = %key,
                    owner_package_id = %row.package_id,
                    "Artifact key belongs to a committed package, leaving it"
                );
            }
            Ok(None) => {
                intent.advance(IntentState::Failed)?;
                match self.timed("delete", key, self.storage.delete(key)).await {
                    Ok(()) => warn!(object_key = %key, "Removed artifact after failed commit"),
                    Err(cleanup) => error!(
                        object_key = %key,
                        bucket = %package.object_store_bucket,
                        error = %cleanup,
                        "Orphaned artifact left in object store"
                    ),
                }
            }
            Err(lookup) => {
                intent.advance(IntentState::Failed)?;
                error!(
                    object_key = %key,
                    bucket = %package.object_store_bucket,
                    error = %lookup,
                    "Orphaned artifact left in object store"
                );
            }
        }

        Err(cause)
    }

    #[instrument(skip(self, package), fields(name = %package.name, package_id = %package.package_id))]
    pub async fn delete(&self, package: &Package) -> Result<(), ServiceError> {
        let key = &package.object_store_key;
        let mut intent = Intent::new(IntentKind::Delete, &package.name, key);

        let mut tx = self.repository.begin().await?;

        match tx.delete_package(package.package_id).await {
            Ok(true) => {}
            Ok(false) => {
                let e = ServiceError::NotFound(format!("Package '{}'", package.name));
                return Err(abandon(tx, &mut intent, e).await);
            }
            Err(e) => return Err(abandon(tx, &mut intent, e).await),
        }

        let snapshot = match self.timed("download", key, self.storage.download(key)).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(object_key = %key, error = %e, "Artifact not snapshotted before delete");
                None
            }
        };

        if let Err(e) = self.timed("delete", key, self.storage.delete(key)).await {
            return Err(abandon(tx, &mut intent, e).await);
        }
        intent.advance(IntentState::Stored)?;

        if let Err(e) = tx.commit().await {
            return self.settle_failed_delete(package, &mut intent, snapshot, e).await;
        }
        intent.advance(IntentState::Committed)?;

        info!(object_key = %key, "Package deleted");
        Ok(())
    }

    /// Decide what a delete commit error left behind, restoring the artifact
    /// when the row may still reference it.
    async fn settle_failed_delete(
        &self,
        package: &Package,
        intent: &mut Intent,
        snapshot: Option<Vec<u8>>,
        cause: ServiceError,
    ) -> Result<(), ServiceError> {
        let key = &package.object_store_key;

        let row_survived = match self.repository.find_package_by_id(package.package_id).await {
            Ok(row) => row.is_some(),
            Err(lookup) => {
                warn!(error = %lookup, "Delete outcome unknown, assuming the row survived");
                true
            }
        };
        if !row_survived {
            intent.advance(IntentState::Committed)?;
            warn!(object_key = %key, error = %cause, "Commit reported failure but the row is gone");
            return Ok(());
        }

        intent.advance(IntentState::Failed)?;
        let restored = match snapshot {
            Some(bytes) => self.timed("upload", key, self.storage.upload(key, bytes)).await,
            None => Err(ServiceError::Storage(anyhow::anyhow!("No snapshot of '{}'", key))),
        };
        match restored {
            Ok(()) => warn!(object_key = %key, "Restored artifact after failed delete commit"),
            Err(restore) => error!(
                package_id = %package.package_id,
                object_key = %key,
                bucket = %package.object_store_bucket,
                error = %restore,
                "Package row left without its artifact"
            ),
        }

        Err(cause)
    }

    pub async fn list(&self) -> Result<Vec<Package>, ServiceError> {
        self.repository.list_packages().await
    }

    pub async fn get(&self, package_id: Uuid) -> Result<Package, ServiceError> {
        self.repository
            .find_package_by_id(package_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Package {}", package_id)))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Package, ServiceError> {
        self.repository
            .find_package_by_name(name)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Package '{}'", name)))
    }

    /// Run an object-store call under the configured timeout.
    async fn timed<T, F>(&self, operation: &str, key: &str, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let timer = STORAGE_CALL_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let result = match self.storage_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Storage(anyhow::anyhow!(
                    "{} of '{}' timed out after {:?}",
                    operation,
                    key,
                    limit
                ))),
            },
            None => call.await,
        };

        timer.observe_duration();
        result
    }
}

/// Roll back an intent that never touched the object store.
async fn abandon(
    mut tx: Box<dyn PackageTransaction>,
    intent: &mut Intent,
    cause: ServiceError,
) -> ServiceError {
    if let Err(e) = tx.rollback().await {
        // Dropping the transaction still rolls it back.
        warn!(error = %e, "Explicit rollback failed");
    }
    if let Err(e) = intent.advance(IntentState::RolledBack) {
        error!(error = %e, "Intent bookkeeping failed");
    }
    warn!(
        kind = intent.kind.as_str(),
        package = %intent.package_name,
        error_kind = cause.kind(),
        error = %cause,
        "Intent rolled back"
    );
    cause
}
