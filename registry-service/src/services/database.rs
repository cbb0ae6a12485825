//! PostgreSQL implementations of the repository traits.

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{Package, User};
use crate::services::error::ServiceError;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{PackageRepository, PackageTransaction, UserRepository};

const USER_COLUMNS: &str = "user_id, full_name, public_email, private_email, password_hash, \
     public_email_verified, private_email_verified, created_utc";

const PACKAGE_COLUMNS: &str = "package_id, name, description, homepage, repository_url, keywords, \
     owner_user_id, object_store_bucket, object_store_key, created_utc";

/// Map a unique-index violation to `Uniqueness`, everything else to `Database`.
fn map_write_error(e: sqlx::Error, what: String) -> ServiceError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => ServiceError::Uniqueness(what),
        _ => ServiceError::Database(e),
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "registry-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl UserRepository for Database {
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_user"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO users (user_id, full_name, public_email, private_email, password_hash,
                               public_email_verified, private_email_verified, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.full_name)
        .bind(&user.public_email)
        .bind(&user.private_email)
        .bind(&user.password_hash)
        .bind(user.public_email_verified)
        .bind(user.private_email_verified)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, format!("User '{}'", user.private_email)))?;

        timer.observe_duration();
        info!("User created");
        Ok(())
    }

    #[instrument(skip(self, identifier))]
    async fn find_user_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_user_by_identifier"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE private_email = $1",
            USER_COLUMNS
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_user_by_id"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE user_id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(user)
    }
}

#[async_trait]
impl PackageRepository for Database {
    async fn begin(&self) -> Result<Box<dyn PackageTransaction>, ServiceError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgPackageTransaction { tx: Some(tx) }))
    }

    #[instrument(skip(self))]
    async fn list_packages(&self) -> Result<Vec<Package>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_packages"])
            .start_timer();

        let packages = sqlx::query_as::<_, Package>(&format!(
            "SELECT {} FROM packages ORDER BY created_utc, name",
            PACKAGE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(packages)
    }

    #[instrument(skip(self), fields(package_id = %package_id))]
    async fn find_package_by_id(
        &self,
        package_id: Uuid,
    ) -> Result<Option<Package>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_package_by_id"])
            .start_timer();

        let package = sqlx::query_as::<_, Package>(&format!(
            "SELECT {} FROM packages WHERE package_id = $1",
            PACKAGE_COLUMNS
        ))
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(package)
    }

    #[instrument(skip(self))]
    async fn find_package_by_name(&self, name: &str) -> Result<Option<Package>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_package_by_name"])
            .start_timer();

        let package = sqlx::query_as::<_, Package>(&format!(
            "SELECT {} FROM packages WHERE name = $1",
            PACKAGE_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(package)
    }
}

/// A pooled PostgreSQL transaction. Dropped while still open, sqlx rolls it back.
pub struct PgPackageTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgPackageTransaction {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, ServiceError> {
        self.tx
            .as_mut()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Transaction already finished")))
    }

    fn take(&mut self) -> Result<Transaction<'static, Postgres>, ServiceError> {
        self.tx
            .take()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Transaction already finished")))
    }
}

#[async_trait]
impl PackageTransaction for PgPackageTransaction {
    #[instrument(skip(self))]
    async fn name_exists(&mut self, name: &str) -> Result<bool, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["package_name_exists"])
            .start_timer();

        let tx = self.tx()?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM packages WHERE name = $1)")
                .bind(name)
                .fetch_one(&mut **tx)
                .await?;

        timer.observe_duration();
        Ok(exists)
    }

    #[instrument(skip(self, package), fields(name = %package.name))]
    async fn insert_package(&mut self, package: &Package) -> Result<(), ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_package"])
            .start_timer();

        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO packages (package_id, name, description, homepage, repository_url, keywords,
                                  owner_user_id, object_store_bucket, object_store_key, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(package.package_id)
        .bind(&package.name)
        .bind(&package.description)
        .bind(&package.homepage)
        .bind(&package.repository_url)
        .bind(&package.keywords)
        .bind(package.owner_user_id)
        .bind(&package.object_store_bucket)
        .bind(&package.object_store_key)
        .bind(package.created_utc)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_write_error(e, format!("Package '{}'", package.name)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(package_id = %package_id))]
    async fn delete_package(&mut self, package_id: Uuid) -> Result<bool, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_package"])
            .start_timer();

        let tx = self.tx()?;
        let result = sqlx::query("DELETE FROM packages WHERE package_id = $1")
            .bind(package_id)
            .execute(&mut **tx)
            .await?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    async fn commit(&mut self) -> Result<(), ServiceError> {
        self.take()?.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ServiceError> {
        self.take()?.rollback().await?;
        Ok(())
    }
}
