//! Database dump adapter.
//!
//! Orchestration only talks to [`DumpExecutor`]; [`pg::PgDumpExecutor`] is the
//! subprocess-backed PostgreSQL implementation.

pub mod pg;

use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use pg::PgDumpExecutor;

/// Connection parameters handed to dump/apply tools.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// What a dump should contain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpMode {
    /// Schema and data, without ownership or privilege statements
    Full,
    /// Data only, restricted to the listed tables
    IncrementalDataOnly { tables: Vec<String> },
}

/// How an apply run reacts to failing statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    pub stop_on_error: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self { stop_on_error: true }
    }
}

#[async_trait]
pub trait DumpExecutor: Send + Sync {
    /// Write a dump of `conn` to `dest` and return its path.
    ///
    /// An incremental dump with no tables never reaches the tool; a
    /// placeholder file is written instead.
    async fn dump(&self, conn: &ConnectionParams, dest: &Path, mode: DumpMode) -> Result<PathBuf> {
        if let DumpMode::IncrementalDataOnly { tables } = &mode {
            if tables.is_empty() {
                write_no_changes_placeholder(dest).await?;
                tracing::info!(file = %dest.display(), "No timestamped tables found, wrote empty incremental dump");
                return Ok(dest.to_path_buf());
            }
        }
        self.run_dump(conn, dest, &mode).await?;
        Ok(dest.to_path_buf())
    }

    /// Produce the dump. Called by [`DumpExecutor::dump`] for non-empty work.
    async fn run_dump(&self, conn: &ConnectionParams, dest: &Path, mode: &DumpMode) -> Result<()>;

    /// Replay a dump file against the live database.
    async fn apply(&self, conn: &ConnectionParams, sql_file: &Path, options: ApplyOptions) -> Result<()>;
}

async fn write_no_changes_placeholder(dest: &Path) -> Result<()> {
    let body = format!(
        "-- Incremental backup: no tables with created/updated timestamp columns were found.\n\
         -- No incremental changes to dump.\n\
         -- Generated at {}\n",
        chrono::Utc::now().to_rfc3339()
    );
    tokio::fs::write(dest, body).await?;
    Ok(())
}
