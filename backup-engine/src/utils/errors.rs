//! Error types for the backup engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Database dump failed with exit code {exit_code}: {stderr}")]
    DumpFailed { exit_code: i32, stderr: String },

    #[error("Failed to start {tool}: {source}")]
    DumpToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Applying database dump failed with exit code {exit_code}: {stderr}")]
    ApplyFailed { exit_code: i32, stderr: String },

    #[error("Archive operation failed for {}: {source}", path.display())]
    ArchiveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checksum mismatch for '{name}': expected {expected}, got {actual}")]
    ManifestIntegrityMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Backup not found: {}", .0.display())]
    BackupNotFound(PathBuf),

    /// Never returned to callers; built so cleanup failures log uniformly.
    #[error("Failed to remove partial backup {}: {source}", path.display())]
    PartialCleanupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
