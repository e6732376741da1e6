//! Backup manifests.
//!
//! A manifest names every artifact of a backup and records its SHA-256. It is
//! written as `manifest.json` inside the backup directory before compression,
//! so it travels inside the archive.

use crate::checksum;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for BackupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted description of one backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_timestamp: Option<DateTime<Utc>>,
    /// Logical name -> file name inside the backup
    pub files: BTreeMap<String, String>,
    /// Logical name -> hex SHA-256
    pub checksums: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created: DateTime<Utc>,
    pub version: String,
}

impl Manifest {
    /// Read `manifest.json` from a backup directory; `None` when absent.
    pub async fn load(backup_dir: &Path) -> Result<Option<Self>> {
        let path = backup_dir.join(MANIFEST_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Reject entries that would resolve outside the backup directory.
    pub fn check_file_names(&self) -> Result<()> {
        for (name, file) in &self.files {
            let path = Path::new(file);
            let contained = path.components().next().is_some()
                && path.components().all(|c| matches!(c, Component::Normal(_)));
            if !contained {
                return Err(BackupError::InvalidBackup(format!(
                    "manifest entry '{}' does not name a file inside the backup: {}",
                    name, file
                )));
            }
        }
        Ok(())
    }

    /// Recompute every recorded checksum against the files in `backup_dir`.
    ///
    /// Fails on the first entry whose digest differs, whose file is missing,
    /// or which has no recorded checksum.
    pub async fn verify(&self, backup_dir: &Path) -> Result<()> {
        self.check_file_names()?;
        for (name, file) in &self.files {
            let expected = self.checksums.get(name).ok_or_else(|| BackupError::ManifestIntegrityMismatch {
                name: name.clone(),
                expected: "<none recorded>".to_string(),
                actual: "<unverified>".to_string(),
            })?;

            let path = backup_dir.join(file);
            let actual = match checksum::digest(&path).await {
                Ok(actual) => actual,
                Err(BackupError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    "<missing file>".to_string()
                }
                Err(e) => return Err(e),
            };

            if &actual != expected {
                return Err(BackupError::ManifestIntegrityMismatch {
                    name: name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        tracing::debug!(files = self.files.len(), "Manifest checksums verified");
        Ok(())
    }
}

/// Collects manifest fields, then hashes and persists in [`ManifestBuilder::build`].
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    backup_type: BackupType,
    timestamp: DateTime<Utc>,
    base_timestamp: Option<DateTime<Utc>>,
    files: BTreeMap<String, String>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl ManifestBuilder {
    pub fn new(backup_type: BackupType, timestamp: DateTime<Utc>) -> Self {
        Self {
            backup_type,
            timestamp,
            base_timestamp: None,
            files: BTreeMap::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn base_timestamp(mut self, base: DateTime<Utc>) -> Self {
        self.base_timestamp = Some(base);
        self
    }

    pub fn file(mut self, name: impl Into<String>, file_name: impl Into<String>) -> Self {
        self.files.insert(name.into(), file_name.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Checksum every file, write `manifest.json` into `backup_dir`.
    pub async fn build(self, backup_dir: &Path) -> Result<Manifest> {
        let mut checksums = BTreeMap::new();
        for (name, file) in &self.files {
            let digest = checksum::digest(&backup_dir.join(file)).await?;
            checksums.insert(name.clone(), digest);
        }

        let manifest = Manifest {
            backup_type: self.backup_type,
            timestamp: self.timestamp,
            base_timestamp: self.base_timestamp,
            files: self.files,
            checksums,
            metadata: self.metadata,
            created: Utc::now(),
            version: MANIFEST_VERSION.to_string(),
        };

        let json = serde_json::to_vec_pretty(&manifest)?;
        tokio::fs::write(backup_dir.join(MANIFEST_FILE), json).await?;

        tracing::debug!(
            backup_type = %manifest.backup_type,
            files = manifest.files.len(),
            "Manifest written"
        );
        Ok(manifest)
    }
}
