//! In-memory collaborators for orchestration tests.

use crate::config::Config;
use crate::database::DatabaseInspector;
use crate::dump::{ApplyOptions, ConnectionParams, DumpExecutor, DumpMode};
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

pub const FULL_DUMP_SQL: &str = "CREATE TABLE users (id int, created_at timestamptz);\nINSERT INTO users VALUES (1, now());\n";

#[derive(Debug, Clone)]
pub struct AppliedDump {
    pub path: PathBuf,
    pub contents: String,
    pub options: ApplyOptions,
}

#[derive(Default)]
pub struct FakeDumper {
    pub fail_with_exit: Option<i32>,
    pub dumps: Mutex<Vec<DumpMode>>,
    pub applied: Mutex<Vec<AppliedDump>>,
}

impl FakeDumper {
    pub fn failing(exit_code: i32) -> Self {
        Self {
            fail_with_exit: Some(exit_code),
            ..Self::default()
        }
    }

    pub fn applied(&self) -> Vec<AppliedDump> {
        self.applied.lock().unwrap().clone()
    }

    pub fn dumps(&self) -> Vec<DumpMode> {
        self.dumps.lock().unwrap().clone()
    }
}

#[async_trait]
impl DumpExecutor for FakeDumper {
    async fn run_dump(&self, _conn: &ConnectionParams, dest: &Path, mode: &DumpMode) -> Result<()> {
        self.dumps.lock().unwrap().push(mode.clone());
        if let Some(exit_code) = self.fail_with_exit {
            return Err(BackupError::DumpFailed {
                exit_code,
                stderr: "pg_dump: error: connection refused".into(),
            });
        }
        let body = match mode {
            DumpMode::Full => FULL_DUMP_SQL.to_string(),
            DumpMode::IncrementalDataOnly { tables } => tables
                .iter()
                .map(|t| format!("COPY public.\"{}\" FROM stdin;\n\\.\n", t))
                .collect(),
        };
        tokio::fs::write(dest, body).await?;
        Ok(())
    }

    async fn apply(&self, _conn: &ConnectionParams, sql_file: &Path, options: ApplyOptions) -> Result<()> {
        let contents = tokio::fs::read_to_string(sql_file).await?;
        self.applied.lock().unwrap().push(AppliedDump {
            path: sql_file.to_path_buf(),
            contents,
            options,
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDatabase {
    pub tables: Vec<String>,
    pub unreachable: bool,
    pub closed: AtomicBool,
}

impl FakeDatabase {
    pub fn with_tables(tables: &[&str]) -> Self {
        Self {
            tables: tables.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseInspector for FakeDatabase {
    async fn ping(&self) -> Result<()> {
        if self.unreachable {
            return Err(BackupError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn timestamped_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Config rooted in a temp dir, with one application log file in place.
pub fn temp_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.backup_dir = temp.path().join("backups");
    config.storage.log_dir = temp.path().join("app-logs");
    std::fs::create_dir_all(&config.storage.log_dir).unwrap();
    std::fs::write(config.storage.log_dir.join("app.log"), b"GET /health 200\n").unwrap();
    config.compression.level = 1;
    config
}
