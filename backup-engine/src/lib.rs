//! Backup Engine Library
//!
//! Scheduled PostgreSQL backups with manifests, SHA-256 integrity checks,
//! gzip archives, age-based retention and verified restore.

pub mod archive;
pub mod backup;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod database;
pub mod dump;
pub mod fs;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use backup::manifest::{BackupType, Manifest};
pub use backup::{BackupResult, FullBackupOptions, IncrementalBackupOptions};
pub use catalog::BackupRecord;
pub use config::Config;
pub use database::{DatabaseInspector, PgDatabase};
pub use dump::{DumpExecutor, PgDumpExecutor};
pub use restore::{RestoreOptions, RestoreResult};
pub use retention::CleanupReport;
pub use service::{BackupService, ServiceStatus};
pub use utils::errors::BackupError;
pub use utils::errors::Result;
