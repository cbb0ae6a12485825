//! Persistence seams for users and packages.
//!
//! `database.rs` implements these against PostgreSQL. The `Mock*` types keep
//! everything in memory and mimic the transactional behaviour closely enough
//! to exercise publish/delete rollback without a database.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{Package, User};
use crate::services::error::ServiceError;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Uniqueness` when the login identifier is taken.
    async fn insert_user(&self, user: &User) -> Result<(), ServiceError>;
    /// `identifier` must already be normalized.
    async fn find_user_by_identifier(&self, identifier: &str)
        -> Result<Option<User>, ServiceError>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError>;
}

#[async_trait]
pub trait PackageRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn PackageTransaction>, ServiceError>;
    async fn list_packages(&self) -> Result<Vec<Package>, ServiceError>;
    async fn find_package_by_id(&self, package_id: Uuid)
        -> Result<Option<Package>, ServiceError>;
    async fn find_package_by_name(&self, name: &str) -> Result<Option<Package>, ServiceError>;
}

/// An open relational transaction. Dropping it without `commit` rolls back.
/// `commit` and `rollback` may be called at most once.
#[async_trait]
pub trait PackageTransaction: Send {
    async fn name_exists(&mut self, name: &str) -> Result<bool, ServiceError>;
    /// Fails with `Uniqueness` when the name is taken.
    async fn insert_package(&mut self, package: &Package) -> Result<(), ServiceError>;
    /// Returns false when no row matched.
    async fn delete_package(&mut self, package_id: Uuid) -> Result<bool, ServiceError>;
    async fn commit(&mut self) -> Result<(), ServiceError>;
    async fn rollback(&mut self) -> Result<(), ServiceError>;
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, ServiceError> {
    mutex
        .lock()
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("{} mutex poisoned: {}", what, e)))
}

fn finished() -> ServiceError {
    ServiceError::Internal(anyhow::anyhow!("Transaction already finished"))
}

#[derive(Default)]
pub struct MockUserRepository {
    users: Mutex<Vec<User>>,
}

impl MockUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.lock().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        let mut users = lock(&self.users, "Mock users")?;
        if users.iter().any(|u| u.private_email == user.private_email) {
            return Err(ServiceError::Uniqueness(format!(
                "User '{}'",
                user.private_email
            )));
        }
        users.push(user.clone());
        Ok(())
    }

    async fn find_user_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, ServiceError> {
        Ok(lock(&self.users, "Mock users")?
            .iter()
            .find(|u| u.private_email == identifier)
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(lock(&self.users, "Mock users")?
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned())
    }
}

#[derive(Default)]
struct MockPackageState {
    packages: Mutex<Vec<Package>>,
    fail_next_commit: AtomicBool,
    lose_next_commit_ack: AtomicBool,
}

/// In-memory package table. Writes are staged per transaction and applied on
/// commit, with the name constraint re-checked at that point.
#[derive(Default, Clone)]
pub struct MockPackageRepository {
    state: Arc<MockPackageState>,
}

impl MockPackageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail without applying anything.
    pub fn fail_next_commit(&self) {
        self.state.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make the next `commit` apply its writes and still report an error,
    /// as when the connection drops before the acknowledgement arrives.
    pub fn lose_next_commit_ack(&self) {
        self.state.lose_next_commit_ack.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.state.packages.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PackageRepository for MockPackageRepository {
    async fn begin(&self) -> Result<Box<dyn PackageTransaction>, ServiceError> {
        Ok(Box::new(MockPackageTransaction {
            state: self.state.clone(),
            inserts: Vec::new(),
            deletes: Vec::new(),
            finished: false,
        }))
    }

    async fn list_packages(&self) -> Result<Vec<Package>, ServiceError> {
        Ok(lock(&self.state.packages, "Mock packages")?.clone())
    }

    async fn find_package_by_id(
        &self,
        package_id: Uuid,
    ) -> Result<Option<Package>, ServiceError> {
        Ok(lock(&self.state.packages, "Mock packages")?
            .iter()
            .find(|p| p.package_id == package_id)
            .cloned())
    }

    async fn find_package_by_name(&self, name: &str) -> Result<Option<Package>, ServiceError> {
        Ok(lock(&self.state.packages, "Mock packages")?
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }
}

pub struct MockPackageTransaction {
    state: Arc<MockPackageState>,
    inserts: Vec<Package>,
    deletes: Vec<Uuid>,
    finished: bool,
}

#[async_trait]
impl PackageTransaction for MockPackageTransaction {
    async fn name_exists(&mut self, name: &str) -> Result<bool, ServiceError> {
        if self.finished {
            return Err(finished());
        }
        let committed = lock(&self.state.packages, "Mock packages")?
            .iter()
            .any(|p| p.name == name && !self.deletes.contains(&p.package_id));
        Ok(committed || self.inserts.iter().any(|p| p.name == name))
    }

    async fn insert_package(&mut self, package: &Package) -> Result<(), ServiceError> {
        if self.name_exists(&package.name).await? {
            return Err(ServiceError::Uniqueness(format!("Package '{}'", package.name)));
        }
        self.inserts.push(package.clone());
        Ok(())
    }

    async fn delete_package(&mut self, package_id: Uuid) -> Result<bool, ServiceError> {
        if self.finished {
            return Err(finished());
        }
        if self.deletes.contains(&package_id) {
            return Ok(false);
        }
        if let Some(pos) = self.inserts.iter().position(|p| p.package_id == package_id) {
            self.inserts.remove(pos);
            return Ok(true);
        }
        let exists = lock(&self.state.packages, "Mock packages")?
            .iter()
            .any(|p| p.package_id == package_id);
        if exists {
            self.deletes.push(package_id);
        }
        Ok(exists)
    }

    async fn commit(&mut self) -> Result<(), ServiceError> {
        if self.finished {
            return Err(finished());
        }
        self.finished = true;

        if self.state.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Injected commit failure"
            )));
        }

        let mut packages = lock(&self.state.packages, "Mock packages")?;
        for package in &self.inserts {
            if packages.iter().any(|p| p.name == package.name) {
                return Err(ServiceError::Uniqueness(format!("Package '{}'", package.name)));
            }
        }
        packages.retain(|p| !self.deletes.contains(&p.package_id));
        packages.append(&mut self.inserts);

        if self.state.lose_next_commit_ack.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Connection lost awaiting commit"
            )));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ServiceError> {
        if self.finished {
            return Err(finished());
        }
        self.finished = true;
        self.inserts.clear();
        self.deletes.clear();
        Ok(())
    }
}
