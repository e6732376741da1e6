//! Restore a stored backup onto the live database.
//!
//! Phases: `Validating -> Extracting -> ReadingManifest -> Verifying ->
//! RestoringDatabase -> RestoringLogs -> Cleanup -> Done`, with `Failed`
//! reachable from any of them. Extraction only happens for archives and the
//! logs step only when requested. Checksums are verified before anything is
//! applied.

use crate::archive;
use crate::backup::manifest::Manifest;
use crate::config::Config;
use crate::dump::{ApplyOptions, DumpExecutor};
use crate::{BackupError, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Validating,
    Extracting,
    ReadingManifest,
    Verifying,
    RestoringDatabase,
    RestoringLogs,
    Cleanup,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    pub restore_logs: bool,
    /// Keep applying SQL past failing statements
    pub force_restore: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoredComponents {
    pub database: bool,
    pub logs: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub success: bool,
    pub duration_ms: u64,
    pub manifest: Option<Manifest>,
    pub restored_components: RestoredComponents,
}

struct Session {
    label: String,
    phase: RestorePhase,
    scratch: Option<PathBuf>,
}

impl Session {
    fn enter(&mut self, phase: RestorePhase) {
        tracing::debug!(backup = %self.label, from = ?self.phase, to = ?phase, "Restore phase");
        self.phase = phase;
    }
}

pub struct RestoreOrchestrator {
    config: Arc<Config>,
    dumper: Arc<dyn DumpExecutor>,
}

impl RestoreOrchestrator {
    pub fn new(config: Arc<Config>, dumper: Arc<dyn DumpExecutor>) -> Self {
        Self { config, dumper }
    }

    pub async fn restore(&self, backup_path: &Path, options: RestoreOptions) -> Result<RestoreResult> {
        let started = Instant::now();
        let mut session = Session {
            label: backup_path.display().to_string(),
            phase: RestorePhase::Validating,
            scratch: None,
        };

        if !tokio::fs::try_exists(backup_path).await? {
            session.enter(RestorePhase::Failed);
            return Err(BackupError::BackupNotFound(backup_path.to_path_buf()));
        }

        tracing::info!(
            backup = %session.label,
            restore_logs = options.restore_logs,
            force = options.force_restore,
            "Starting restore"
        );

        let outcome = self.run(&mut session, backup_path, options).await;

        let failed_in = session.phase;
        if let Some(scratch) = session.scratch.take() {
            session.enter(RestorePhase::Cleanup);
            if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
                tracing::warn!(path = %scratch.display(), error = %e, "Failed to remove restore scratch directory");
            }
        }

        match outcome {
            Ok((manifest, restored_components)) => {
                session.enter(RestorePhase::Done);
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    backup = %session.label,
                    database = restored_components.database,
                    logs = restored_components.logs,
                    duration_ms,
                    "Restore completed"
                );
                Ok(RestoreResult {
                    success: true,
                    duration_ms,
                    manifest,
                    restored_components,
                })
            }
            Err(e) => {
                tracing::error!(backup = %session.label, phase = ?failed_in, error = %e, "Restore failed");
                session.enter(RestorePhase::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session: &mut Session,
        backup_path: &Path,
        options: RestoreOptions,
    ) -> Result<(Option<Manifest>, RestoredComponents)> {
        let work_dir = if archive::is_archive(backup_path) {
            session.enter(RestorePhase::Extracting);
            let scratch = self.scratch_dir();
            session.scratch = Some(scratch.clone());
            archive::extract(backup_path, &scratch).await?
        } else if tokio::fs::metadata(backup_path).await?.is_dir() {
            backup_path.to_path_buf()
        } else {
            return Err(BackupError::InvalidBackup(format!(
                "{} is neither a backup directory nor a .tar.gz archive",
                backup_path.display()
            )));
        };

        session.enter(RestorePhase::ReadingManifest);
        let manifest = Manifest::load(&work_dir).await?;
        if let Some(manifest) = &manifest {
            manifest.check_file_names()?;
        }

        session.enter(RestorePhase::Verifying);
        match &manifest {
            Some(manifest) => {
                manifest.verify(&work_dir).await?;
                tracing::info!(files = manifest.checksums.len(), "Backup checksums verified");
            }
            None => {
                tracing::warn!(backup = %session.label, "No manifest found, restoring without integrity verification");
            }
        }

        let mut restored = RestoredComponents::default();

        session.enter(RestorePhase::RestoringDatabase);
        let sql_file = locate_sql(&work_dir, manifest.as_ref()).await?;
        self.dumper
            .apply(
                &self.config.database.connection(),
                &sql_file,
                ApplyOptions {
                    stop_on_error: !options.force_restore,
                },
            )
            .await?;
        restored.database = true;

        if options.restore_logs {
            session.enter(RestorePhase::RestoringLogs);
            match locate_logs(&work_dir, manifest.as_ref()).await? {
                Some(logs) => {
                    archive::extract(&logs, &self.config.storage.log_dir).await?;
                    restored.logs = true;
                }
                None => tracing::warn!(backup = %session.label, "Backup has no logs archive"),
            }
        }

        Ok((manifest, restored))
    }

    fn scratch_dir(&self) -> PathBuf {
        self.config
            .storage
            .backup_dir
            .join(format!(".restore_{}", crate::catalog::timestamp_tag(Utc::now())))
    }
}

async fn locate_sql(dir: &Path, manifest: Option<&Manifest>) -> Result<PathBuf> {
    if let Some(file) = manifest.and_then(|m| m.files.get("database")) {
        return Ok(dir.join(file));
    }
    first_with_suffix(dir, ".sql")
        .await?
        .ok_or_else(|| BackupError::InvalidBackup(format!("no SQL dump in {}", dir.display())))
}

async fn locate_logs(dir: &Path, manifest: Option<&Manifest>) -> Result<Option<PathBuf>> {
    if let Some(file) = manifest.and_then(|m| m.files.get("logs")) {
        return Ok(Some(dir.join(file)));
    }
    first_with_suffix(dir, ".tar.gz").await
}

async fn first_with_suffix(dir: &Path, suffix: &str) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().ends_with(suffix) {
            matches.push(entry.path());
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}
