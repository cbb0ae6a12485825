//! Manifest extraction from uploaded artifacts.
//!
//! An artifact is a gzip-compressed tarball held in memory. Exactly one entry
//! must match the configured manifest path (default `buff.toml`); its
//! `[package]` table is decoded into a [`PackageDescriptor`]. Nothing is
//! written to disk.

use flate2::read::GzDecoder;
use serde::Deserialize;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument, warn};

use crate::config::ManifestConfig;
use crate::models::PackageDescriptor;
use crate::services::error::ServiceError;

/// Entry read failures tolerated before the archive is rejected.
const MAX_SKIPPED_ENTRIES: usize = 1;

/// Largest manifest accepted, whatever the tar header claims.
pub const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

enum Scanned {
    Other,
    Manifest(Vec<u8>),
    Oversized(u64),
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    package: PackageDescriptor,
}

#[derive(Debug, Clone)]
pub struct ManifestExtractor {
    manifest_path: PathBuf,
}

impl ManifestExtractor {
    pub fn new(config: &ManifestConfig) -> Self {
        Self {
            manifest_path: normalize(Path::new(&config.file_name)),
        }
    }

    #[instrument(skip(self, artifact), fields(artifact_bytes = artifact.len()))]
    pub fn extract(&self, artifact: &[u8]) -> Result<PackageDescriptor, ServiceError> {
        let raw = self.find_manifest(artifact)?;
        let text = String::from_utf8(raw).map_err(|e| {
            ServiceError::ManifestParse(anyhow::anyhow!("Manifest is not valid UTF-8: {}", e))
        })?;
        parse_manifest(&text)
    }

    fn find_manifest(&self, artifact: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let mut archive = tar::Archive::new(GzDecoder::new(artifact));
        let entries = archive.entries().map_err(|e| {
            ServiceError::Extraction(anyhow::anyhow!("Failed to open archive: {}", e))
        })?;

        let mut manifest: Option<Vec<u8>> = None;
        let mut skipped = 0usize;
        let mut last_error: Option<std::io::Error> = None;

        for entry in entries {
            let read = entry.and_then(|mut entry| {
                let path = normalize(&entry.path()?);
                if path != self.manifest_path {
                    return Ok(Scanned::Other);
                }
                if entry.size() > MAX_MANIFEST_BYTES {
                    return Ok(Scanned::Oversized(entry.size()));
                }
                let mut buf = Vec::new();
                (&mut entry)
                    .take(MAX_MANIFEST_BYTES + 1)
                    .read_to_end(&mut buf)?;
                if buf.len() as u64 > MAX_MANIFEST_BYTES {
                    return Ok(Scanned::Oversized(buf.len() as u64));
                }
                Ok(Scanned::Manifest(buf))
            });

            match read {
                Ok(Scanned::Other) => {}
                Ok(Scanned::Oversized(size)) => {
                    return Err(ServiceError::Extraction(anyhow::anyhow!(
                        "{} is {} bytes, limit is {}",
                        self.manifest_path.display(),
                        size,
                        MAX_MANIFEST_BYTES
                    )));
                }
                Ok(Scanned::Manifest(buf)) => {
                    if manifest.is_some() {
                        return Err(ServiceError::Extraction(anyhow::anyhow!(
                            "Archive contains more than one {}",
                            self.manifest_path.display()
                        )));
                    }
                    debug!(manifest_bytes = buf.len(), "Manifest entry found");
                    manifest = Some(buf);
                }
                Err(e) => {
                    skipped += 1;
                    if skipped > MAX_SKIPPED_ENTRIES {
                        return Err(ServiceError::Extraction(anyhow::anyhow!(
                            "Too many unreadable archive entries: {}",
                            e
                        )));
                    }
                    warn!(error = %e, "Skipping unreadable archive entry");
                    last_error = Some(e);
                }
            }
        }

        manifest.ok_or_else(|| match last_error {
            Some(e) => ServiceError::Extraction(anyhow::anyhow!(
                "{} not found; archive could not be fully read: {}",
                self.manifest_path.display(),
                e
            )),
            None => ServiceError::Extraction(anyhow::anyhow!(
                "{} not found in archive",
                self.manifest_path.display()
            )),
        })
    }
}

/// Decode manifest text. Unknown keys are ignored and missing keys are left
/// for validation to report.
pub fn parse_manifest(text: &str) -> Result<PackageDescriptor, ServiceError> {
    let file: ManifestFile = toml::from_str(text)?;
    Ok(file.package)
}

/// Drop `.` components so `./buff.toml` and `buff.toml` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
