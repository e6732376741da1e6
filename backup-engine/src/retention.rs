//! Age-based retention over the backup tree.

use crate::backup::manifest::BackupType;
use crate::catalog::{is_backup_entry, StorageLayout};
use crate::fs::walker::path_size;
use crate::Result;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Summary of a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted_count: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone)]
pub struct RetentionManager {
    layout: StorageLayout,
}

impl RetentionManager {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Delete every backup under `full/` and `incremental/` whose modification
    /// time is strictly older than `days` days ago. Other files are left alone.
    pub async fn cleanup(&self, days: u32) -> Result<CleanupReport> {
        let window = Duration::from_secs(u64::from(days) * 86_400);
        let cutoff = SystemTime::now()
            .checked_sub(window)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.cleanup_before(cutoff).await
    }

    pub async fn cleanup_before(&self, cutoff: SystemTime) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for backup_type in [BackupType::Full, BackupType::Incremental] {
            sweep(&self.layout.type_dir(backup_type), backup_type, cutoff, &mut report).await?;
        }

        tracing::info!(
            deleted = report.deleted_count,
            bytes_freed = report.bytes_freed,
            "Retention cleanup finished"
        );
        Ok(report)
    }
}

async fn sweep(
    dir: &Path,
    backup_type: BackupType,
    cutoff: SystemTime,
    report: &mut CleanupReport,
) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_backup_entry(&name, backup_type, metadata.is_file()) {
            continue;
        }
        if metadata.modified()? >= cutoff {
            continue;
        }

        let path = entry.path();
        let size_path = path.clone();
        let size = tokio::task::spawn_blocking(move || path_size(&size_path))
            .await
            .map_err(std::io::Error::other)??;

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }

        tracing::info!(path = %path.display(), size, "Deleted expired backup");
        report.deleted_count += 1;
        report.bytes_freed += size;
    }

    Ok(())
}
