//! Storage layout and backup listing.
//!
//! There is no separate index: the `full/` and `incremental/` trees are the
//! catalog. Entries are either uncompressed directories or `.tar.gz` archives
//! named `<type>_backup_<timestamp>`.

use crate::backup::manifest::BackupType;
use crate::fs::walker::path_size;
use crate::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Timestamp embedded in backup and artifact names (microsecond granularity).
pub const NAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%6fZ";

const ARCHIVE_SUFFIX: &str = ".tar.gz";

pub fn timestamp_tag(at: DateTime<Utc>) -> String {
    at.format(NAME_TIMESTAMP_FORMAT).to_string()
}

/// Paths below the backup root
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn full_dir(&self) -> PathBuf {
        self.root.join("full")
    }

    pub fn incremental_dir(&self) -> PathBuf {
        self.root.join("incremental")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn type_dir(&self, backup_type: BackupType) -> PathBuf {
        match backup_type {
            BackupType::Full => self.full_dir(),
            BackupType::Incremental => self.incremental_dir(),
        }
    }

    /// Create the storage subtree if missing.
    pub async fn ensure(&self) -> Result<()> {
        for dir in [self.full_dir(), self.incremental_dir(), self.logs_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// One stored backup, derived from the filesystem
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    layout: StorageLayout,
}

impl Catalog {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Every stored backup, newest `created_at` first.
    pub async fn list(&self) -> Result<Vec<BackupRecord>> {
        let mut records = Vec::new();
        for backup_type in [BackupType::Full, BackupType::Incremental] {
            records.extend(scan(&self.layout.type_dir(backup_type), backup_type).await?);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// `created_at` of the most recently created backup of any type.
    pub async fn latest_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.list().await?.first().map(|r| r.created_at))
    }
}

/// Whether a directory entry is a stored backup of `backup_type`: a
/// `<type>_backup_` directory or `.tar.gz` archive.
pub(crate) fn is_backup_entry(name: &str, backup_type: BackupType, is_file: bool) -> bool {
    name.starts_with(&name_prefix(backup_type)) && (!is_file || name.ends_with(ARCHIVE_SUFFIX))
}

fn name_prefix(backup_type: BackupType) -> String {
    format!("{}_backup_", backup_type.as_str())
}

async fn scan(dir: &Path, backup_type: BackupType) -> Result<Vec<BackupRecord>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        match describe(&entry, backup_type).await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            // Removed between read_dir and stat, e.g. by a concurrent cleanup.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %entry.path().display(), "Backup vanished while listing");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(records)
}

async fn describe(entry: &tokio::fs::DirEntry, backup_type: BackupType) -> std::io::Result<Option<BackupRecord>> {
    let name = entry.file_name().to_string_lossy().to_string();
    if !name.starts_with(&name_prefix(backup_type)) {
        return Ok(None);
    }

    let metadata = entry.metadata().await?;
    if !is_backup_entry(&name, backup_type, metadata.is_file()) {
        return Ok(None);
    }

    let path = entry.path();
    let modified_at: DateTime<Utc> = metadata.modified()?.into();
    let created_at = parse_name_timestamp(&name, &name_prefix(backup_type))
        .or_else(|| metadata.created().ok().map(Into::into))
        .unwrap_or(modified_at);

    let size_path = path.clone();
    let size_bytes = tokio::task::spawn_blocking(move || path_size(&size_path))
        .await
        .map_err(std::io::Error::other)??;

    Ok(Some(BackupRecord {
        name,
        backup_type,
        path,
        size_bytes,
        created_at,
        modified_at,
    }))
}

fn parse_name_timestamp(name: &str, prefix: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(prefix)?;
    let stamp = stamp.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(stamp);
    NaiveDateTime::parse_from_str(stamp, NAME_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
