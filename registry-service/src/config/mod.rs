//! Configuration module for registry-service.

use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const MIN_PROD_SIGNING_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub token: TokenConfig,
    pub manifest: ManifestConfig,
    pub validation: ValidationConfig,
    pub wire: WireConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    pub local_path: PathBuf,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    /// Upper bound for a single object-store call. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub signing_key: Secret<String>,
    pub issuer: String,
    pub audience: String,
    pub expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct ManifestConfig {
    pub file_name: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            file_name: "buff.toml".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Resolve the repository_url host before accepting a descriptor.
    pub repository_host_check: bool,
}

/// How failures are reported over gRPC.
#[derive(Debug, Clone, Default)]
pub struct WireConfig {
    /// Map each error kind to its own status code instead of `INTERNAL`.
    pub detailed_errors: bool,
}

impl RegistryConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let environment: Environment = get_env("ENVIRONMENT", Some("dev"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let service_name = get_env("SERVICE_NAME", Some("registry-service"), false)?;

        let storage_timeout_secs: u64 = parse_env("STORAGE_TIMEOUT_SECS", "30")?;

        let config = Self {
            common,
            environment,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "2")?,
            },
            storage: StorageConfig {
                backend: get_env("STORAGE_BACKEND", Some("local"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                bucket: get_env("STORAGE_BUCKET", Some("buff-artifacts"), is_prod)?,
                local_path: PathBuf::from(get_env("STORAGE_LOCAL_PATH", Some("storage"), false)?),
                s3_region: env::var("STORAGE_S3_REGION").ok(),
                s3_endpoint: env::var("STORAGE_S3_ENDPOINT").ok(),
                timeout: (storage_timeout_secs > 0)
                    .then(|| Duration::from_secs(storage_timeout_secs)),
            },
            token: TokenConfig {
                signing_key: Secret::new(get_env(
                    "TOKEN_SIGNING_KEY",
                    Some("dev-only-signing-key-change-me"),
                    is_prod,
                )?),
                issuer: service_name.clone(),
                audience: get_env("TOKEN_AUDIENCE", Some("localhost"), is_prod)?,
                expiry_days: parse_env("TOKEN_EXPIRY_DAYS", "7")?,
            },
            manifest: ManifestConfig {
                file_name: get_env("MANIFEST_FILE_NAME", Some("buff.toml"), false)?,
            },
            validation: ValidationConfig {
                repository_host_check: parse_env("REPOSITORY_HOST_CHECK", "true")?,
            },
            wire: WireConfig {
                detailed_errors: parse_env("WIRE_DETAILED_ERRORS", "false")?,
            },
            service_name,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.token.expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.storage.bucket.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STORAGE_BUCKET must not be empty"
            )));
        }

        if self.manifest.file_name.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MANIFEST_FILE_NAME must not be empty"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS exceeds DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.environment == Environment::Prod
            && self.token.signing_key.expose_secret().len() < MIN_PROD_SIGNING_KEY_LEN
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_SIGNING_KEY must be at least {} bytes in production",
                MIN_PROD_SIGNING_KEY_LEN
            )));
        }

        if !self.validation.repository_host_check {
            tracing::warn!("Repository host resolution is disabled");
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "s3" => Ok(StorageBackend::S3),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}
