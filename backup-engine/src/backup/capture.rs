//! Auxiliary artifacts captured next to the database dump.

use crate::archive::{self, ArchiveOutput};
use crate::config::Config;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationSnapshot<'a> {
    captured_at: DateTime<Utc>,
    application: ApplicationInfo,
    config: Config,
    metadata: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ApplicationInfo {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub captured_at: DateTime<Utc>,
    pub hostname: String,
    pub os: &'static str,
    pub family: &'static str,
    pub arch: &'static str,
    pub cpus: usize,
    pub pid: u32,
    pub working_dir: Option<String>,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            captured_at: Utc::now(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            os: std::env::consts::OS,
            family: std::env::consts::FAMILY,
            arch: std::env::consts::ARCH,
            cpus: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            pid: std::process::id(),
            working_dir: std::env::current_dir().ok().map(|p| p.display().to_string()),
        }
    }
}

/// Application configuration with secrets redacted, plus caller metadata.
pub async fn write_application_snapshot(
    dest: &Path,
    config: &Config,
    metadata: &serde_json::Map<String, serde_json::Value>,
) -> Result<()> {
    let snapshot = ApplicationSnapshot {
        captured_at: Utc::now(),
        application: ApplicationInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        },
        config: config.redacted(),
        metadata,
    };
    tokio::fs::write(dest, serde_json::to_vec_pretty(&snapshot)?).await?;
    Ok(())
}

pub async fn write_system_info(dest: &Path) -> Result<()> {
    let info = SystemInfo::collect();
    tokio::fs::write(dest, serde_json::to_vec_pretty(&info)?).await?;
    Ok(())
}

/// Archive log files modified after `since`. A missing log directory yields
/// an empty archive.
pub async fn archive_logs(
    log_dir: &Path,
    dest: &Path,
    level: u32,
    since: SystemTime,
) -> Result<ArchiveOutput> {
    let files = if tokio::fs::try_exists(log_dir).await? {
        let root = log_dir.to_path_buf();
        let options = WalkOptions {
            modified_after: Some(since),
        };
        tokio::task::spawn_blocking(move || walk_directory(&root, &options))
            .await
            .map_err(std::io::Error::other)??
    } else {
        tracing::warn!(log_dir = %log_dir.display(), "Log directory not found, capturing no logs");
        Vec::new()
    };

    tracing::debug!(files = files.len(), "Capturing log files");
    archive::compress_files(files, dest, level).await
}
