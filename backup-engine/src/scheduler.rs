//! Cron-driven job timers.
//!
//! Each named job is either stopped or scheduled. A triggered body that fails
//! or panics is logged and the timer keeps running. A tick that finds the same
//! job still executing is skipped.

use crate::config::JobSchedule;
use crate::{BackupError, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub type JobBody = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    /// Whether the job's timer is active
    pub running: bool,
}

struct JobEntry {
    schedule: String,
    enabled: bool,
    body: JobBody,
    handle: Option<Uuid>,
}

type InFlight = Arc<StdMutex<HashSet<String>>>;

pub struct Scheduler {
    scheduler: Mutex<JobScheduler>,
    jobs: StdMutex<BTreeMap<String, JobEntry>>,
    in_flight: InFlight,
    started: AtomicBool,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| BackupError::Scheduler(e.to_string()))?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            jobs: StdMutex::new(BTreeMap::new()),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
            started: AtomicBool::new(false),
        })
    }

    /// Define a job. It stays stopped until `start_job` or `start`.
    pub fn register(&self, name: &str, schedule: &JobSchedule, body: JobBody) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(name) {
            return Err(BackupError::DuplicateJob(name.to_string()));
        }
        jobs.insert(
            name.to_string(),
            JobEntry {
                schedule: schedule.cron.clone(),
                enabled: schedule.enabled,
                body,
                handle: None,
            },
        );
        tracing::debug!(job = %name, cron = %schedule.cron, enabled = schedule.enabled, "Job registered");
        Ok(())
    }

    pub async fn start_job(&self, name: &str) -> Result<()> {
        // Held from the handle check until the new handle is stored.
        let scheduler = self.scheduler.lock().await;
        let (cron, body) = {
            let jobs = lock(&self.jobs);
            let entry = jobs
                .get(name)
                .ok_or_else(|| BackupError::UnknownJob(name.to_string()))?;
            if entry.handle.is_some() {
                return Ok(());
            }
            (normalize_cron(&entry.schedule), entry.body.clone())
        };

        let job_name = name.to_string();
        let in_flight = self.in_flight.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let name = job_name.clone();
            let body = body.clone();
            let in_flight = in_flight.clone();
            Box::pin(async move {
                if guarded(&name, &body, &in_flight).await.is_none() {
                    tracing::warn!(job = %name, "Skipping scheduled run: job already running");
                }
            })
        })
        .map_err(|e| BackupError::Scheduler(format!("invalid cron '{}' for job {}: {}", cron, name, e)))?;

        let uuid = scheduler
            .add(job)
            .await
            .map_err(|e| BackupError::Scheduler(e.to_string()))?;

        if let Some(entry) = lock(&self.jobs).get_mut(name) {
            entry.handle = Some(uuid);
        }
        tracing::info!(job = %name, cron = %cron, "Job scheduled");
        Ok(())
    }

    pub async fn stop_job(&self, name: &str) -> Result<()> {
        let scheduler = self.scheduler.lock().await;
        let handle = lock(&self.jobs)
            .get_mut(name)
            .ok_or_else(|| BackupError::UnknownJob(name.to_string()))?
            .handle
            .take();

        if let Some(uuid) = handle {
            scheduler
                .remove(&uuid)
                .await
                .map_err(|e| BackupError::Scheduler(e.to_string()))?;
            tracing::info!(job = %name, "Job stopped");
        }
        Ok(())
    }

    /// Schedule every enabled job and start the timer loop.
    pub async fn start(&self) -> Result<()> {
        let enabled: Vec<String> = lock(&self.jobs)
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &enabled {
            self.start_job(name).await?;
        }

        self.scheduler
            .lock()
            .await
            .start()
            .await
            .map_err(|e| BackupError::Scheduler(e.to_string()))?;
        self.started.store(true, Ordering::SeqCst);
        tracing::info!(count = enabled.len(), "Scheduler started");
        Ok(())
    }

    /// Stop every job and the timer loop. Runs already executing finish on
    /// their own.
    pub async fn shutdown(&self) -> Result<()> {
        let names: Vec<String> = lock(&self.jobs).keys().cloned().collect();
        for name in &names {
            self.stop_job(name).await?;
        }
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| BackupError::Scheduler(e.to_string()))?;
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    pub fn jobs(&self) -> Vec<JobStatus> {
        lock(&self.jobs)
            .iter()
            .map(|(name, entry)| JobStatus {
                name: name.clone(),
                schedule: entry.schedule.clone(),
                running: entry.handle.is_some(),
            })
            .collect()
    }

    /// Run a job's body now, outside its timer. Fails if the job is already
    /// executing.
    pub async fn run_job(&self, name: &str) -> Result<()> {
        let body = lock(&self.jobs)
            .get(name)
            .map(|entry| entry.body.clone())
            .ok_or_else(|| BackupError::UnknownJob(name.to_string()))?;

        guarded(name, &body, &self.in_flight)
            .await
            .unwrap_or_else(|| Err(BackupError::Scheduler(format!("job {} is already running", name))))
    }
}

/// Run `body` unless `name` is already in flight. `None` means skipped.
async fn guarded(name: &str, body: &JobBody, in_flight: &InFlight) -> Option<Result<()>> {
    if !lock(in_flight).insert(name.to_string()) {
        return None;
    }
    let outcome = execute(name, body).await;
    lock(in_flight).remove(name);
    Some(outcome)
}

async fn execute(name: &str, body: &JobBody) -> Result<()> {
    let started = Instant::now();
    tracing::info!(job = %name, "Job started");

    let outcome = match AssertUnwindSafe(async { body().await }).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(BackupError::Scheduler(format!("job {} panicked: {}", name, message)))
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        Ok(()) => tracing::info!(job = %name, duration_ms, "Job finished"),
        Err(e) => tracing::error!(job = %name, duration_ms, error = %e, "Job failed"),
    }
    outcome
}

/// tokio-cron-scheduler wants a seconds field; classic five-field
/// expressions fire at second zero.
pub fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_body(counter: Arc<AtomicUsize>) -> JobBody {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[test]
    fn test_normalize_cron() {
        assert_eq!(normalize_cron("0 2 * * *"), "0 0 2 * * *");
        assert_eq!(normalize_cron(" */5 * * * * * "), "*/5 * * * * *");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_and_unknown_jobs() {
        let scheduler = Scheduler::new().await.unwrap();
        let body = counting_body(Arc::new(AtomicUsize::new(0)));
        scheduler.register("cleanup", &JobSchedule::new("0 3 * * *"), body.clone()).unwrap();

        let err = scheduler.register("cleanup", &JobSchedule::new("0 4 * * *"), body).unwrap_err();
        assert!(matches!(err, BackupError::DuplicateJob(ref n) if n == "cleanup"));

        let err = scheduler.stop_job("missing").await.unwrap_err();
        assert!(matches!(err, BackupError::UnknownJob(_)));
        let err = scheduler.run_job("missing").await.unwrap_err();
        assert!(matches!(err, BackupError::UnknownJob(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_and_stop_toggle_status() {
        let scheduler = Scheduler::new().await.unwrap();
        let body = counting_body(Arc::new(AtomicUsize::new(0)));
        scheduler.register("full-backup", &JobSchedule::new("0 2 * * *"), body).unwrap();
        assert!(!scheduler.jobs()[0].running);

        scheduler.start_job("full-backup").await.unwrap();
        assert_eq!(
            scheduler.jobs(),
            vec![JobStatus {
                name: "full-backup".into(),
                schedule: "0 2 * * *".into(),
                running: true,
            }]
        );

        scheduler.stop_job("full-backup").await.unwrap();
        assert!(!scheduler.jobs()[0].running);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disabled_job_not_started() {
        let scheduler = Scheduler::new().await.unwrap();
        let body = counting_body(Arc::new(AtomicUsize::new(0)));
        let mut schedule = JobSchedule::new("0 2 * * *");
        schedule.enabled = false;
        scheduler.register("full-backup", &schedule, body.clone()).unwrap();
        scheduler.register("cleanup", &JobSchedule::new("0 3 * * *"), body).unwrap();

        scheduler.start().await.unwrap();
        let running: Vec<_> = scheduler.jobs().into_iter().map(|j| (j.name, j.running)).collect();
        assert_eq!(running, vec![("cleanup".to_string(), true), ("full-backup".to_string(), false)]);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_cron_rejected() {
        let scheduler = Scheduler::new().await.unwrap();
        let body = counting_body(Arc::new(AtomicUsize::new(0)));
        scheduler.register("bad", &JobSchedule::new("not a cron"), body).unwrap();
        let err = scheduler.start_job("bad").await.unwrap_err();
        assert!(matches!(err, BackupError::Scheduler(_)));
        assert!(!scheduler.jobs()[0].running);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failures_and_panics_are_contained() {
        let scheduler = Scheduler::new().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let body: JobBody = Arc::new(move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(BackupError::InvalidBackup("boom".into())),
                    1 => panic!("dump exploded"),
                    _ => Ok(()),
                }
            }
            .boxed()
        });
        scheduler.register("flaky", &JobSchedule::new("0 2 * * *"), body).unwrap();

        assert!(matches!(
            scheduler.run_job("flaky").await,
            Err(BackupError::InvalidBackup(_))
        ));
        let err = scheduler.run_job("flaky").await.unwrap_err();
        assert!(err.to_string().contains("dump exploded"));
        scheduler.run_job("flaky").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overlapping_run_is_refused() {
        let scheduler = Arc::new(Scheduler::new().await.unwrap());
        let release = Arc::new(tokio::sync::Notify::new());
        let r = release.clone();
        let body: JobBody = Arc::new(move || {
            let r = r.clone();
            async move {
                r.notified().await;
                Ok(())
            }
            .boxed()
        });
        scheduler.register("slow", &JobSchedule::new("0 2 * * *"), body).unwrap();

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_job("slow").await })
        };
        while !lock(&scheduler.in_flight).contains("slow") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = scheduler.run_job("slow").await.unwrap_err();
        assert!(err.to_string().contains("already running"));

        release.notify_one();
        first.await.unwrap().unwrap();
        assert!(lock(&scheduler.in_flight).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduled_job_fires() {
        let scheduler = Scheduler::new().await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register("tick", &JobSchedule::new("* * * * * *"), counting_body(counter.clone()))
            .unwrap();

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await.unwrap();

        assert!(counter.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_start_then_stop_leaves_no_timer() {
        let scheduler = Scheduler::new().await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut schedule = JobSchedule::new("* * * * * *");
        schedule.enabled = false;
        scheduler.register("tick", &schedule, counting_body(counter.clone())).unwrap();

        let (a, b) = tokio::join!(scheduler.start_job("tick"), scheduler.start_job("tick"));
        a.unwrap();
        b.unwrap();
        scheduler.stop_job("tick").await.unwrap();
        assert!(!scheduler.jobs()[0].running);

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
