//! Directory traversal for archiving and size accounting.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Only keep files modified strictly after this instant
    pub modified_after: Option<SystemTime>,
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,
}

impl FileInfo {
    /// Symlinks are resolved to their target; links to directories or
    /// dangling links yield `None`.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let metadata = if raw.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if !resolved.is_dir() => resolved,
                _ => return Ok(None),
            }
        } else {
            raw
        };

        Ok(Some(Self {
            path,
            relative_path,
            size: metadata.len(),
            modified: metadata.modified()?,
        }))
    }
}

/// Walk a directory tree and collect all regular files.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }

        if let Some(info) = FileInfo::from_entry(&entry, root)? {
            if let Some(after) = options.modified_after {
                if info.modified <= after {
                    continue;
                }
            }
            files.push(info);
        }
    }

    Ok(files)
}

/// Total size of a file, or of every file below a directory.
pub fn path_size(path: &Path) -> std::io::Result<u64> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }
    Ok(walk_directory(path, &WalkOptions::default())?
        .iter()
        .map(|f| f.size)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;

        let mut files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].relative_path, PathBuf::from("subdir/file2.txt"));

        Ok(())
    }

    #[test]
    fn test_path_size() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("file1.txt"), b"12345")?; // 5 bytes
        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("nested/file2.txt"), b"1234567")?; // 7 bytes

        assert_eq!(path_size(temp_dir.path())?, 12);
        assert_eq!(path_size(&temp_dir.path().join("file1.txt"))?, 5);

        Ok(())
    }

    #[test]
    fn test_modified_after_filter() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let old = temp_dir.path().join("old.log");
        let new = temp_dir.path().join("new.log");
        fs::write(&old, b"old")?;
        fs::write(&new, b"new")?;

        let now = SystemTime::now();
        fs::File::options()
            .write(true)
            .open(&old)?
            .set_modified(now - Duration::from_secs(3600))?;

        let options = WalkOptions {
            modified_after: Some(now - Duration::from_secs(60)),
        };
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, PathBuf::from("new.log"));

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_resolve_to_files_only() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("real.log"), b"12345")?;
        fs::create_dir(temp_dir.path().join("dir"))?;
        std::os::unix::fs::symlink(temp_dir.path().join("real.log"), temp_dir.path().join("link.log"))?;
        std::os::unix::fs::symlink(temp_dir.path().join("gone.log"), temp_dir.path().join("dangling.log"))?;
        std::os::unix::fs::symlink(temp_dir.path().join("dir"), temp_dir.path().join("dir-link"))?;

        let mut files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let names: Vec<_> = files.iter().map(|f| f.relative_path.clone()).collect();
        assert_eq!(names, vec![PathBuf::from("link.log"), PathBuf::from("real.log")]);
        assert_eq!(files[0].size, 5);

        Ok(())
    }
}
