//! Backup orchestration.
//!
//! A run moves through `Preparing -> Dumping -> CapturingAuxiliary ->
//! Manifesting -> (Compressing) -> Done`, or lands in `Failed`, after which
//! whatever the run created is removed on a best-effort basis.

pub mod capture;
pub mod manifest;

use crate::archive;
use crate::catalog::{timestamp_tag, Catalog, StorageLayout};
use crate::config::Config;
use crate::database::DatabaseInspector;
use crate::dump::{DumpExecutor, DumpMode};
use crate::fs::walker::path_size;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use manifest::{BackupType, Manifest, ManifestBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    Idle,
    Preparing,
    Dumping,
    CapturingAuxiliary,
    Manifesting,
    Compressing,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FullBackupOptions {
    /// Archive the backup directory and remove the uncompressed copy
    pub compress: bool,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for FullBackupOptions {
    fn default() -> Self {
        Self {
            compress: true,
            metadata: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IncrementalBackupOptions {
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub path: PathBuf,
    pub name: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub duration_ms: u64,
    pub size_bytes: u64,
    pub manifest: Manifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_timestamp: Option<DateTime<Utc>>,
}

/// State of a single run
struct Run {
    name: String,
    phase: BackupPhase,
    /// Paths this run created, removed again on failure
    created: Vec<PathBuf>,
}

impl Run {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phase: BackupPhase::Idle,
            created: Vec::new(),
        }
    }

    fn enter(&mut self, phase: BackupPhase) {
        tracing::debug!(backup = %self.name, from = ?self.phase, to = ?phase, "Backup phase");
        self.phase = phase;
    }
}

/// What a successful run hands to `finish`
struct Completed {
    manifest: Manifest,
    path: PathBuf,
    base_timestamp: Option<DateTime<Utc>>,
}

pub struct BackupOrchestrator {
    config: Arc<Config>,
    layout: StorageLayout,
    catalog: Catalog,
    dumper: Arc<dyn DumpExecutor>,
    database: Arc<dyn DatabaseInspector>,
}

impl BackupOrchestrator {
    pub fn new(
        config: Arc<Config>,
        dumper: Arc<dyn DumpExecutor>,
        database: Arc<dyn DatabaseInspector>,
    ) -> Self {
        let layout = StorageLayout::new(&config.storage.backup_dir);
        Self {
            catalog: Catalog::new(layout.clone()),
            layout,
            config,
            dumper,
            database,
        }
    }

    /// Dump, auxiliary captures, manifest, and (by default) compression.
    pub async fn create_full_backup(&self, options: FullBackupOptions) -> Result<BackupResult> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let tag = timestamp_tag(timestamp);
        let mut run = Run::new(&format!("full_backup_{}", tag));

        tracing::info!(backup = %run.name, compress = options.compress, "Starting full backup");
        let outcome = self.run_full(&mut run, &tag, timestamp, options).await;
        self.finish(run, BackupType::Full, started, outcome).await
    }

    /// Data-only dump of timestamped tables plus logs newer than the
    /// previous backup. Always compressed.
    pub async fn create_incremental_backup(&self, options: IncrementalBackupOptions) -> Result<BackupResult> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let tag = timestamp_tag(timestamp);
        let mut run = Run::new(&format!("incremental_backup_{}", tag));

        tracing::info!(backup = %run.name, "Starting incremental backup");
        let outcome = self.run_incremental(&mut run, &tag, timestamp, options).await;
        self.finish(run, BackupType::Incremental, started, outcome).await
    }

    async fn run_full(
        &self,
        run: &mut Run,
        tag: &str,
        timestamp: DateTime<Utc>,
        options: FullBackupOptions,
    ) -> Result<Completed> {
        run.enter(BackupPhase::Preparing);
        let parent = self.layout.full_dir();
        let dir = parent.join(&run.name);
        let archive_path = parent.join(format!("{}.tar.gz", run.name));
        self.prepare(run, &dir, &archive_path).await?;

        run.enter(BackupPhase::Dumping);
        let sql_name = format!("database_full_{}.sql", tag);
        self.dumper
            .dump(&self.config.database.connection(), &dir.join(&sql_name), DumpMode::Full)
            .await?;

        run.enter(BackupPhase::CapturingAuxiliary);
        let app_name = format!("application_data_{}.json", tag);
        capture::write_application_snapshot(&dir.join(&app_name), &self.config, &options.metadata).await?;

        let system_name = format!("system_info_{}.json", tag);
        capture::write_system_info(&dir.join(&system_name)).await?;

        let logs_name = format!("logs_backup_{}.tar.gz", tag);
        let window = Duration::from_secs(u64::from(self.config.storage.log_capture_days) * SECS_PER_DAY);
        let since = SystemTime::now().checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
        capture::archive_logs(
            &self.config.storage.log_dir,
            &dir.join(&logs_name),
            self.config.compression.level,
            since,
        )
        .await?;

        run.enter(BackupPhase::Manifesting);
        let manifest = ManifestBuilder::new(BackupType::Full, timestamp)
            .file("database", sql_name)
            .file("application", app_name)
            .file("system", system_name)
            .file("logs", logs_name)
            .metadata(options.metadata)
            .build(&dir)
            .await?;

        let path = if options.compress {
            self.compress(run, &dir, &archive_path).await?;
            archive_path
        } else {
            dir
        };

        Ok(Completed {
            manifest,
            path,
            base_timestamp: None,
        })
    }

    async fn run_incremental(
        &self,
        run: &mut Run,
        tag: &str,
        timestamp: DateTime<Utc>,
        options: IncrementalBackupOptions,
    ) -> Result<Completed> {
        run.enter(BackupPhase::Preparing);
        // Resolved before this run's own directory exists.
        let base = self
            .catalog
            .latest_created_at()
            .await?
            .unwrap_or(DateTime::UNIX_EPOCH);
        tracing::info!(backup = %run.name, base = %base.to_rfc3339(), "Incremental baseline");

        let parent = self.layout.incremental_dir();
        let dir = parent.join(&run.name);
        let archive_path = parent.join(format!("{}.tar.gz", run.name));
        self.prepare(run, &dir, &archive_path).await?;

        run.enter(BackupPhase::Dumping);
        let tables = self.database.timestamped_tables().await?;
        tracing::debug!(backup = %run.name, tables = ?tables, "Incremental tables");
        let sql_name = format!("database_incremental_{}.sql", tag);
        self.dumper
            .dump(
                &self.config.database.connection(),
                &dir.join(&sql_name),
                DumpMode::IncrementalDataOnly { tables },
            )
            .await?;

        run.enter(BackupPhase::CapturingAuxiliary);
        let logs_name = format!("recent_logs_{}.tar.gz", tag);
        capture::archive_logs(
            &self.config.storage.log_dir,
            &dir.join(&logs_name),
            self.config.compression.level,
            SystemTime::from(base),
        )
        .await?;

        run.enter(BackupPhase::Manifesting);
        let manifest = ManifestBuilder::new(BackupType::Incremental, timestamp)
            .base_timestamp(base)
            .file("database", sql_name)
            .file("logs", logs_name)
            .metadata(options.metadata)
            .build(&dir)
            .await?;

        self.compress(run, &dir, &archive_path).await?;

        Ok(Completed {
            manifest,
            path: archive_path,
            base_timestamp: Some(base),
        })
    }

    /// Create the run directory. Refuses to reuse a name already on disk.
    async fn prepare(&self, run: &mut Run, dir: &Path, archive_path: &Path) -> Result<()> {
        if tokio::fs::try_exists(archive_path).await? {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", archive_path.display()),
            )
            .into());
        }
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir(dir).await?;
        run.created.push(dir.to_path_buf());
        Ok(())
    }

    async fn compress(&self, run: &mut Run, dir: &Path, archive_path: &Path) -> Result<()> {
        run.enter(BackupPhase::Compressing);
        run.created.push(archive_path.to_path_buf());
        archive::compress(dir, archive_path, self.config.compression.level).await?;
        tokio::fs::remove_dir_all(dir).await?;
        Ok(())
    }

    async fn finish(
        &self,
        mut run: Run,
        backup_type: BackupType,
        started: Instant,
        outcome: Result<Completed>,
    ) -> Result<BackupResult> {
        let completed = match outcome {
            Ok(completed) => completed,
            Err(e) => {
                tracing::error!(backup = %run.name, phase = ?run.phase, error = %e, "Backup failed");
                run.enter(BackupPhase::Failed);
                for leftover in discard_partial(&run.created).await {
                    tracing::warn!(backup = %run.name, error = %leftover, "Partial backup cleanup failed");
                }
                return Err(e);
            }
        };

        let size_path = completed.path.clone();
        let size_bytes = match tokio::task::spawn_blocking(move || path_size(&size_path)).await {
            Ok(Ok(size)) => size,
            _ => {
                tracing::warn!(backup = %run.name, "Could not measure backup size");
                0
            }
        };
        run.enter(BackupPhase::Done);

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            backup = %run.name,
            backup_type = %backup_type,
            path = %completed.path.display(),
            size_bytes,
            duration_ms,
            "Backup completed"
        );

        Ok(BackupResult {
            path: completed.path,
            name: run.name,
            backup_type,
            duration_ms,
            size_bytes,
            manifest: completed.manifest,
            base_timestamp: completed.base_timestamp,
        })
    }
}

/// Remove partial artifacts, newest first. Paths that could not be removed
/// are reported back; already missing ones are not.
async fn discard_partial(paths: &[PathBuf]) -> Vec<BackupError> {
    let mut leftovers = Vec::new();
    for path in paths.iter().rev() {
        let removal = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };

        match removal {
            Ok(()) => tracing::info!(path = %path.display(), "Removed partial backup artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => leftovers.push(BackupError::PartialCleanupFailed {
                path: path.clone(),
                source,
            }),
        }
    }
    leftovers
}
