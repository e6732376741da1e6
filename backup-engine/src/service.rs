//! Entry point for callers of the backup subsystem.

use crate::backup::{
    BackupOrchestrator, BackupResult, FullBackupOptions, IncrementalBackupOptions,
};
use crate::catalog::{BackupRecord, Catalog, StorageLayout};
use crate::config::Config;
use crate::database::DatabaseInspector;
use crate::dump::DumpExecutor;
use crate::restore::{RestoreOptions, RestoreOrchestrator, RestoreResult};
use crate::retention::{CleanupReport, RetentionManager};
use crate::scheduler::{JobBody, JobStatus, Scheduler};
use crate::{BackupError, Result};
use futures_util::FutureExt;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub const FULL_BACKUP_JOB: &str = "full-backup";
pub const INCREMENTAL_BACKUP_JOB: &str = "incremental-backup";
pub const CLEANUP_JOB: &str = "cleanup";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub initialized: bool,
    pub scheduled_jobs: Vec<JobStatus>,
    /// Active configuration, password redacted
    pub config: Config,
}

pub struct BackupService {
    config: Arc<Config>,
    layout: StorageLayout,
    catalog: Catalog,
    backups: Arc<BackupOrchestrator>,
    restorer: RestoreOrchestrator,
    retention: Arc<RetentionManager>,
    database: Arc<dyn DatabaseInspector>,
    scheduler: OnceCell<Scheduler>,
    initialized: AtomicBool,
}

impl BackupService {
    pub fn new(
        config: Config,
        database: Arc<dyn DatabaseInspector>,
        dumper: Arc<dyn DumpExecutor>,
    ) -> Self {
        let config = Arc::new(config);
        let layout = StorageLayout::new(&config.storage.backup_dir);

        Self {
            catalog: Catalog::new(layout.clone()),
            backups: Arc::new(BackupOrchestrator::new(
                config.clone(),
                dumper.clone(),
                database.clone(),
            )),
            restorer: RestoreOrchestrator::new(config.clone(), dumper),
            retention: Arc::new(RetentionManager::new(layout.clone())),
            layout,
            config,
            database,
            scheduler: OnceCell::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create the storage tree, check the database and start the scheduled
    /// jobs. Calling it again is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.layout.ensure().await?;
        self.database.ping().await?;
        tracing::info!(backup_dir = %self.layout.root().display(), "Backup storage ready");

        let scheduler = self
            .scheduler
            .get_or_try_init(|| async { self.build_scheduler().await })
            .await?;

        if self.config.schedule.enabled {
            scheduler.start().await?;
        } else {
            tracing::info!("Scheduling disabled, jobs registered but not started");
        }

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!("Backup service initialized");
        Ok(())
    }

    async fn build_scheduler(&self) -> Result<Scheduler> {
        let scheduler = Scheduler::new().await?;
        let schedule = &self.config.schedule;

        let backups = self.backups.clone();
        let full: JobBody = Arc::new(move || {
            let backups = backups.clone();
            async move {
                backups
                    .create_full_backup(FullBackupOptions::default())
                    .await
                    .map(|_| ())
            }
            .boxed()
        });
        scheduler.register(FULL_BACKUP_JOB, &schedule.full, full)?;

        let backups = self.backups.clone();
        let incremental: JobBody = Arc::new(move || {
            let backups = backups.clone();
            async move {
                backups
                    .create_incremental_backup(IncrementalBackupOptions::default())
                    .await
                    .map(|_| ())
            }
            .boxed()
        });
        scheduler.register(INCREMENTAL_BACKUP_JOB, &schedule.incremental, incremental)?;

        let retention = self.retention.clone();
        let days = self.config.retention.days;
        let cleanup: JobBody = Arc::new(move || {
            let retention = retention.clone();
            async move { retention.cleanup(days).await.map(|_| ()) }.boxed()
        });
        scheduler.register(CLEANUP_JOB, &schedule.cleanup, cleanup)?;

        Ok(scheduler)
    }

    pub async fn create_full_backup(&self, options: FullBackupOptions) -> Result<BackupResult> {
        self.backups.create_full_backup(options).await
    }

    pub async fn create_incremental_backup(&self, options: IncrementalBackupOptions) -> Result<BackupResult> {
        self.backups.create_incremental_backup(options).await
    }

    /// Stored backups, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.catalog.list().await
    }

    pub async fn restore_from_backup(&self, path: &Path, options: RestoreOptions) -> Result<RestoreResult> {
        self.restorer.restore(path, options).await
    }

    pub async fn cleanup_old_backups(&self) -> Result<CleanupReport> {
        self.retention.cleanup(self.config.retention.days).await
    }

    /// Run one of the scheduled jobs immediately.
    pub async fn run_job(&self, name: &str) -> Result<()> {
        match self.scheduler.get() {
            Some(scheduler) => scheduler.run_job(name).await,
            None => Err(BackupError::Scheduler("service not initialized".into())),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            initialized: self.initialized.load(Ordering::SeqCst),
            scheduled_jobs: self.scheduler.get().map(Scheduler::jobs).unwrap_or_default(),
            config: self.config.redacted(),
        }
    }

    /// Stop all jobs and release the database pool.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.shutdown().await?;
        }
        self.database.close().await;
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("Backup service shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive;
    use crate::backup::manifest::BackupType;
    use crate::test_support::{temp_config, FakeDatabase, FakeDumper, FULL_DUMP_SQL};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Harness {
        service: BackupService,
        dumper: Arc<FakeDumper>,
        database: Arc<FakeDatabase>,
        temp: TempDir,
    }

    fn harness(database: FakeDatabase, configure: impl FnOnce(&mut Config)) -> Harness {
        let temp = TempDir::new().unwrap();
        let mut config = temp_config(&temp);
        config.schedule.enabled = false;
        configure(&mut config);
        let dumper = Arc::new(FakeDumper::default());
        let database = Arc::new(database);
        Harness {
            service: BackupService::new(config, database.clone(), dumper.clone()),
            dumper,
            database,
            temp,
        }
    }

    #[tokio::test]
    async fn test_initialize_creates_layout_and_registers_jobs() {
        let h = harness(FakeDatabase::default(), |_| {});
        h.service.initialize().await.unwrap();

        let root = h.service.config.storage.backup_dir.clone();
        for sub in ["full", "incremental", "logs"] {
            assert!(root.join(sub).is_dir(), "missing {}", sub);
        }

        let status = h.service.status();
        assert!(status.initialized);
        let names: Vec<_> = status.scheduled_jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec![CLEANUP_JOB, FULL_BACKUP_JOB, INCREMENTAL_BACKUP_JOB]);
        assert!(status.scheduled_jobs.iter().all(|j| !j.running));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enabled_schedule_starts_and_shutdown_stops() {
        let h = harness(FakeDatabase::default(), |c| {
            c.schedule.enabled = true;
            c.schedule.incremental.enabled = false;
        });
        h.service.initialize().await.unwrap();

        let running: Vec<_> = h
            .service
            .status()
            .scheduled_jobs
            .into_iter()
            .map(|j| (j.name, j.running))
            .collect();
        assert_eq!(
            running,
            vec![
                (CLEANUP_JOB.to_string(), true),
                (FULL_BACKUP_JOB.to_string(), true),
                (INCREMENTAL_BACKUP_JOB.to_string(), false),
            ]
        );

        h.service.shutdown().await.unwrap();
        let status = h.service.status();
        assert!(!status.initialized);
        assert!(status.scheduled_jobs.iter().all(|j| !j.running));
        assert!(h.database.is_closed());
    }

    #[tokio::test]
    async fn test_initialize_fails_when_database_unreachable() {
        let h = harness(
            FakeDatabase {
                unreachable: true,
                ..FakeDatabase::default()
            },
            |_| {},
        );
        assert!(matches!(h.service.initialize().await, Err(BackupError::Database(_))));
        assert!(!h.service.status().initialized);
    }

    #[tokio::test]
    async fn test_status_redacts_password() {
        let h = harness(FakeDatabase::default(), |c| c.database.password = "hunter2".into());
        let status = h.service.status();
        assert!(!status.initialized);
        assert!(status.scheduled_jobs.is_empty());
        assert_eq!(status.config.database.password, "***");
    }

    #[tokio::test]
    async fn test_full_backup_round_trip() {
        let h = harness(FakeDatabase::default(), |_| {});
        h.service.initialize().await.unwrap();

        let backup = h
            .service
            .create_full_backup(FullBackupOptions::default())
            .await
            .unwrap();
        let restored = h
            .service
            .restore_from_backup(&backup.path, RestoreOptions::default())
            .await
            .unwrap();

        assert!(restored.success);
        assert!(restored.restored_components.database);
        assert_eq!(restored.manifest.as_ref(), Some(&backup.manifest));
        let applied = h.dumper.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].contents, FULL_DUMP_SQL);
    }

    #[tokio::test]
    async fn test_empty_incremental_contains_only_comments() {
        let h = harness(FakeDatabase::default(), |_| {});
        h.service.initialize().await.unwrap();

        let backup = h
            .service
            .create_incremental_backup(IncrementalBackupOptions::default())
            .await
            .unwrap();

        let out = archive::extract(&backup.path, &h.temp.path().join("inspect"))
            .await
            .unwrap();
        let sql_name = &backup.manifest.files["database"];
        let sql = std::fs::read_to_string(out.join(sql_name)).unwrap();
        assert!(!sql.trim().is_empty());
        assert!(sql.lines().filter(|l| !l.trim().is_empty()).all(|l| l.starts_with("--")));
        assert!(h.dumper.dumps().is_empty());
    }

    #[tokio::test]
    async fn test_listing_is_newest_first() {
        let h = harness(FakeDatabase::with_tables(&["users"]), |_| {});
        h.service.initialize().await.unwrap();

        h.service.create_full_backup(FullBackupOptions::default()).await.unwrap();
        h.service
            .create_incremental_backup(IncrementalBackupOptions::default())
            .await
            .unwrap();
        let last = h
            .service
            .create_full_backup(FullBackupOptions {
                compress: false,
                ..FullBackupOptions::default()
            })
            .await
            .unwrap();

        let records = h.service.list_backups().await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        assert_eq!(records[0].name, last.name);
        assert_eq!(records[1].backup_type, BackupType::Incremental);
    }

    #[tokio::test]
    async fn test_cleanup_uses_configured_retention() {
        let h = harness(FakeDatabase::default(), |c| c.retention.days = 7);
        h.service.initialize().await.unwrap();

        let old = h
            .service
            .create_full_backup(FullBackupOptions::default())
            .await
            .unwrap();
        std::fs::File::open(&old.path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(8 * 86_400))
            .unwrap();
        let fresh = h
            .service
            .create_full_backup(FullBackupOptions::default())
            .await
            .unwrap();

        let report = h.service.cleanup_old_backups().await.unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.bytes_freed, old.size_bytes);
        assert!(!old.path.exists());
        assert!(fresh.path.exists());
    }

    #[tokio::test]
    async fn test_run_job_on_demand() {
        let h = harness(FakeDatabase::default(), |_| {});
        assert!(matches!(
            h.service.run_job(FULL_BACKUP_JOB).await,
            Err(BackupError::Scheduler(_))
        ));

        h.service.initialize().await.unwrap();
        h.service.run_job(FULL_BACKUP_JOB).await.unwrap();
        assert_eq!(h.service.list_backups().await.unwrap().len(), 1);
        assert!(matches!(
            h.service.run_job("nightly").await,
            Err(BackupError::UnknownJob(_))
        ));
    }
}
