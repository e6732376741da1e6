//! `pg_dump` / `psql` subprocess executor.
//!
//! Credentials travel in `PGPASSWORD`, never on the command line, so they do
//! not show up in process listings.

use super::{ApplyOptions, ConnectionParams, DumpExecutor, DumpMode};
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Runs the PostgreSQL client tools as child processes.
#[derive(Debug, Clone)]
pub struct PgDumpExecutor {
    pg_dump: PathBuf,
    psql: PathBuf,
}

/// Captured outcome of a tool invocation
struct ToolOutput {
    exit_code: i32,
    stderr: String,
}

impl PgDumpExecutor {
    pub fn new(pg_dump: impl Into<PathBuf>, psql: impl Into<PathBuf>) -> Self {
        Self {
            pg_dump: pg_dump.into(),
            psql: psql.into(),
        }
    }

    fn dump_args(conn: &ConnectionParams, dest: &Path, mode: &DumpMode) -> Vec<OsString> {
        let mut args = connection_args(conn);
        args.push("--no-password".into());
        args.push("--format=plain".into());
        args.push(flag_with_path("--file=", dest));

        match mode {
            DumpMode::Full => {
                args.push("--no-owner".into());
                args.push("--no-privileges".into());
            }
            DumpMode::IncrementalDataOnly { tables } => {
                args.push("--data-only".into());
                for table in tables {
                    args.push(format!("--table={}", quote_ident(table)).into());
                }
            }
        }
        args
    }

    fn apply_args(conn: &ConnectionParams, sql_file: &Path, options: ApplyOptions) -> Vec<OsString> {
        let mut args = connection_args(conn);
        args.push("--no-password".into());
        args.push("--quiet".into());
        if options.stop_on_error {
            args.push("--set=ON_ERROR_STOP=1".into());
        }
        args.push(flag_with_path("--file=", sql_file));
        args
    }
}

#[async_trait]
impl DumpExecutor for PgDumpExecutor {
    async fn run_dump(&self, conn: &ConnectionParams, dest: &Path, mode: &DumpMode) -> Result<()> {
        let args = Self::dump_args(conn, dest, mode);
        tracing::info!(
            database = %conn.database,
            file = %dest.display(),
            mode = ?mode,
            "Starting database dump"
        );

        let output = run_tool(&self.pg_dump, &args, &conn.password).await?;
        if output.exit_code != 0 {
            return Err(BackupError::DumpFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        tracing::info!(file = %dest.display(), "Database dump completed");
        Ok(())
    }

    async fn apply(&self, conn: &ConnectionParams, sql_file: &Path, options: ApplyOptions) -> Result<()> {
        let args = Self::apply_args(conn, sql_file, options);
        tracing::info!(
            database = %conn.database,
            file = %sql_file.display(),
            stop_on_error = options.stop_on_error,
            "Applying database dump"
        );

        let output = run_tool(&self.psql, &args, &conn.password).await?;
        if output.exit_code != 0 {
            return Err(BackupError::ApplyFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

fn connection_args(conn: &ConnectionParams) -> Vec<OsString> {
    vec![
        format!("--host={}", conn.host).into(),
        format!("--port={}", conn.port).into(),
        format!("--username={}", conn.user).into(),
        format!("--dbname={}", conn.database).into(),
    ]
}

fn flag_with_path(flag: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(path.as_os_str());
    arg
}

/// Quote a table name so pg_dump matches it literally and case-sensitively.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Spawn `program`, stream its stderr into the log, and wait for exit.
async fn run_tool(program: &Path, args: &[OsString], password: &str) -> Result<ToolOutput> {
    let tool = program.display().to_string();

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !password.is_empty() {
        command.env("PGPASSWORD", password);
    }

    let mut child = command
        .spawn()
        .map_err(|source| BackupError::DumpToolUnavailable { tool: tool.clone(), source })?;

    let stdout = child.stdout.take().map(|s| tokio::spawn(drain_lines(s, tool.clone(), false)));
    let stderr = child.stderr.take().map(|s| tokio::spawn(drain_lines(s, tool.clone(), true)));

    let status = child.wait().await?;

    if let Some(handle) = stdout {
        let _ = handle.await;
    }
    let stderr = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };

    // Killed by a signal: no exit code.
    let exit_code = status.code().unwrap_or(-1);
    Ok(ToolOutput { exit_code, stderr })
}

/// Log each line; keep stderr text for error reporting.
async fn drain_lines<R>(reader: R, tool: String, keep: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if keep {
            tracing::debug!(tool = %tool, "stderr: {}", line);
            captured.push_str(&line);
            captured.push('\n');
        } else {
            tracing::trace!(tool = %tool, "stdout: {}", line);
        }
    }

    captured.trim_end().to_string()
}
