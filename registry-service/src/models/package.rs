//! Packages and the manifest descriptor they are published from.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::FromRow;
use url::Url;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// A published package. The row exists only while its artifact is stored
/// under `object_store_bucket`/`object_store_key`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Package {
    pub package_id: Uuid,
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub repository_url: String,
    pub keywords: Vec<String>,
    pub owner_user_id: Option<Uuid>,
    pub object_store_bucket: String,
    pub object_store_key: String,
    pub created_utc: DateTime<Utc>,
}

impl Package {
    pub fn new(
        descriptor: PackageDescriptor,
        owner_user_id: Option<Uuid>,
        object_store_bucket: String,
        object_store_key: String,
    ) -> Self {
        Self {
            package_id: Uuid::new_v4(),
            name: descriptor.name,
            description: descriptor.description,
            homepage: descriptor.homepage,
            repository_url: descriptor.repository_url,
            keywords: descriptor.keywords,
            owner_user_id,
            object_store_bucket,
            object_store_key,
            created_utc: Utc::now(),
        }
    }
}

/// The `[package]` table of a manifest.
///
/// Missing keys decode to empty values so that validation, not parsing,
/// reports them per field. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate)]
#[serde(default)]
pub struct PackageDescriptor {
    #[validate(
        length(min = 1, max = 214, message = "Package name is required"),
        custom(function = "validate_package_name")
    )]
    pub name: String,
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    #[validate(length(min = 1, message = "Homepage is required"))]
    pub homepage: String,
    #[validate(custom(function = "validate_repository_url"))]
    pub repository_url: String,
    #[validate(
        length(min = 1, message = "At least one keyword is required"),
        custom(function = "validate_keywords")
    )]
    pub keywords: Vec<String>,
}

impl PackageDescriptor {
    /// Host component of `repository_url`, if it parses as an absolute URL.
    pub fn repository_host(&self) -> Option<String> {
        Url::parse(&self.repository_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

fn validate_package_name(name: &str) -> Result<(), ValidationError> {
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(ValidationError::new("package_name")
            .with_message("Package name may only contain letters, digits, '-' and '_'".into()))
    }
}

fn validate_repository_url(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("required")
            .with_message("Repository URL is required".into()));
    }

    let parsed = Url::parse(value).map_err(|_| {
        ValidationError::new("url").with_message("Repository URL must be an absolute URL".into())
    })?;

    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ValidationError::new("url")
            .with_message("Repository URL must include a host".into())),
    }
}

fn validate_keywords(keywords: &[String]) -> Result<(), ValidationError> {
    if keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(ValidationError::new("keywords")
            .with_message("Keywords must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> PackageDescriptor {
        PackageDescriptor {
            name: "acme-widgets".to_string(),
            description: "d".to_string(),
            homepage: "https://acme.example".to_string(),
            repository_url: "https://github.com/acme/widgets".to_string(),
            keywords: vec!["a".to_string(), "b".to_string()],
        }
    }

    #[test]
    fn valid_descriptor_passes() {
        assert!(descriptor().validate().is_ok());
        assert_eq!(descriptor().repository_host().as_deref(), Some("github.com"));
    }

    #[test]
    fn empty_descriptor_reports_every_field() {
        let errors = PackageDescriptor::default().validate().unwrap_err();
        let fields = errors.field_errors();
        for field in ["name", "description", "homepage", "repository_url", "keywords"] {
            assert!(fields.contains_key(field), "missing error for {}", field);
        }
    }

    #[test]
    fn name_with_path_characters_is_rejected() {
        let mut d = descriptor();
        d.name = "../etc".to_string();
        let errors = d.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("name"));
    }

    #[test]
    fn relative_repository_url_is_rejected() {
        let mut d = descriptor();
        d.repository_url = "github.com/acme/widgets".to_string();
        assert!(d.validate().is_err());

        d.repository_url = "mailto:someone@example.com".to_string();
        assert!(d.validate().is_err());
    }

    #[test]
    fn blank_keyword_is_rejected() {
        let mut d = descriptor();
        d.keywords.push("  ".to_string());
        let errors = d.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("keywords"));
    }
}
