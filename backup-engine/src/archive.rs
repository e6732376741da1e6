//! gzip-compressed tar archives.
//!
//! Archiving and extraction run on the blocking pool and stream file contents
//! through the encoder; nothing is buffered whole. Callers own cleanup of a
//! partially written destination when an operation fails.

use crate::fs::walker::{walk_directory, FileInfo, WalkOptions};
use crate::{BackupError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Result of writing an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutput {
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Archive every file below `source_dir`, paths relative to it.
pub async fn compress(source_dir: &Path, dest: &Path, level: u32) -> Result<ArchiveOutput> {
    check_level(level, dest)?;
    let source = source_dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || walk_directory(&source, &WalkOptions::default()))
        .await
        .map_err(|e| archive_error(source_dir, std::io::Error::other(e)))?
        .map_err(|e| archive_error(source_dir, e))?;

    compress_files(files, dest, level).await
}

/// Archive an explicit file list; each entry is stored under its `relative_path`.
pub async fn compress_files(files: Vec<FileInfo>, dest: &Path, level: u32) -> Result<ArchiveOutput> {
    check_level(level, dest)?;
    let dest_owned = dest.to_path_buf();
    let count = files.len();

    let bytes_written = tokio::task::spawn_blocking(move || write_archive(&files, &dest_owned, level))
        .await
        .map_err(|e| archive_error(dest, std::io::Error::other(e)))?
        .map_err(|e| archive_error(dest, e))?;

    tracing::debug!(archive = %dest.display(), files = count, bytes_written, "Archive written");

    Ok(ArchiveOutput {
        path: dest.to_path_buf(),
        bytes_written,
    })
}

/// Unpack `archive` into `dest_dir`, creating it if needed.
pub async fn extract(archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let archive_owned = archive.to_path_buf();
    let dest_owned = dest_dir.to_path_buf();

    tokio::task::spawn_blocking(move || unpack(&archive_owned, &dest_owned))
        .await
        .map_err(|e| archive_error(archive, std::io::Error::other(e)))?
        .map_err(|e| archive_error(archive, e))?;

    tracing::debug!(archive = %archive.display(), dest = %dest_dir.display(), "Archive extracted");
    Ok(dest_dir.to_path_buf())
}

/// True for paths this module produces.
pub fn is_archive(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(".tar.gz"))
        .unwrap_or(false)
}

fn write_archive(files: &[FileInfo], dest: &Path, level: u32) -> std::io::Result<u64> {
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::new(level));
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(true);

    for info in files {
        builder.append_path_with_name(&info.path, &info.relative_path)?;
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    Ok(std::fs::metadata(dest)?.len())
}

fn unpack(archive: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_mtime(true);
    tar.unpack(dest)
}

fn check_level(level: u32, dest: &Path) -> Result<()> {
    if (1..=9).contains(&level) {
        return Ok(());
    }
    Err(archive_error(
        dest,
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("compression level must be between 1 and 9, got {}", level),
        ),
    ))
}

fn archive_error(path: &Path, source: std::io::Error) -> BackupError {
    BackupError::ArchiveFailed {
        path: path.to_path_buf(),
        source,
    }
}
