//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file with environment variable overrides.

use crate::dump::ConnectionParams;
use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const REDACTED: &str = "***";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub retention: RetentionPolicy,
    pub compression: CompressionConfig,
    pub schedule: ScheduleConfig,
    pub database: DatabaseConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the backup tree (`full/`, `incremental/`, `logs/` live here)
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Application log directory captured into backups
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Only logs modified within this many days go into a full backup
    #[serde(default = "default_log_capture_days")]
    pub log_capture_days: u32,
}

/// Rolling retention window shared by full and incremental backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// gzip level, 1 (fast) to 9 (small)
    #[serde(default = "default_compression_level")]
    pub level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Master switch for all recurring jobs
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_full_schedule")]
    pub full: JobSchedule,

    #[serde(default = "default_incremental_schedule")]
    pub incremental: JobSchedule,

    #[serde(default = "default_cleanup_schedule")]
    pub cleanup: JobSchedule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub cron: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_name")]
    pub name: String,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Dump tool binary
    #[serde(default = "default_pg_dump")]
    pub pg_dump: PathBuf,

    /// Restore tool binary
    #[serde(default = "default_psql")]
    pub psql: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_log_capture_days() -> u32 {
    7
}

fn default_retention_days() -> u32 {
    30
}

fn default_compression_level() -> u32 {
    6
}

fn default_enabled() -> bool {
    true
}

fn default_full_schedule() -> JobSchedule {
    JobSchedule::new("0 2 * * *")
}

fn default_incremental_schedule() -> JobSchedule {
    JobSchedule::new("0 */6 * * *")
}

fn default_cleanup_schedule() -> JobSchedule {
    JobSchedule::new("0 3 * * *")
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "app".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_pg_dump() -> PathBuf {
    PathBuf::from("pg_dump")
}

fn default_psql() -> PathBuf {
    PathBuf::from("psql")
}

fn default_max_connections() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            log_dir: default_log_dir(),
            log_capture_days: default_log_capture_days(),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: default_compression_level(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            full: default_full_schedule(),
            incremental: default_incremental_schedule(),
            cleanup: default_cleanup_schedule(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: String::new(),
            pg_dump: default_pg_dump(),
            psql: default_psql(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl JobSchedule {
    pub fn new(cron: &str) -> Self {
        Self {
            cron: cron.to_string(),
            enabled: true,
        }
    }
}

impl DatabaseConfig {
    pub fn connection(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            database: self.name.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("pg_dump", &self.pg_dump)
            .field("psql", &self.psql)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply overrides from process environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (environment, `.env`, tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BACKUP_DIR") {
            self.storage.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("BACKUP_LOG_DIR") {
            self.storage.log_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("BACKUP_RETENTION_DAYS") {
            self.retention.days = parse_var("BACKUP_RETENTION_DAYS", &v)?;
        }
        if let Some(v) = lookup("BACKUP_COMPRESSION_LEVEL") {
            self.compression.level = parse_var("BACKUP_COMPRESSION_LEVEL", &v)?;
        }
        if let Some(v) = lookup("BACKUP_FULL_SCHEDULE") {
            self.schedule.full.cron = v;
        }
        if let Some(v) = lookup("BACKUP_INCREMENTAL_SCHEDULE") {
            self.schedule.incremental.cron = v;
        }
        if let Some(v) = lookup("BACKUP_CLEANUP_SCHEDULE") {
            self.schedule.cleanup.cron = v;
        }
        if let Some(v) = lookup("BACKUP_SCHEDULER_ENABLED") {
            self.schedule.enabled = parse_var("BACKUP_SCHEDULER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = lookup("DB_PORT") {
            self.database.port = parse_var("DB_PORT", &v)?;
        }
        if let Some(v) = lookup("DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = lookup("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.compression.level) {
            return Err(BackupError::Config(format!(
                "compression level must be between 1 and 9, got {}",
                self.compression.level
            )));
        }
        if self.storage.backup_dir.as_os_str().is_empty() {
            return Err(BackupError::Config("backup directory must not be empty".into()));
        }
        for (name, job) in [
            ("full", &self.schedule.full),
            ("incremental", &self.schedule.incremental),
            ("cleanup", &self.schedule.cleanup),
        ] {
            if job.enabled && job.cron.trim().is_empty() {
                return Err(BackupError::Config(format!("{} schedule is enabled but empty", name)));
            }
        }
        Ok(())
    }

    /// Copy of this configuration safe to log, persist, or hand to callers.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.database.password.is_empty() {
            copy.database.password = REDACTED.to_string();
        }
        copy
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BackupError::Config(format!("invalid value for {}: {:?}", key, value)))
}
