// crates/core/src/data_dir.rs
//! Filesystem helpers for the application data directory.
//!
//! Imports never write into the live directory. Files are unpacked into a
//! staging sibling and [`swap_in`] replaces the live directory with two
//! renames, so a failed or cancelled import leaves the old data in place.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::archive::{check_entry_name, entry_name};

/// One regular file found under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// `/`-separated path relative to the data root.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// List every regular file under `root`, sorted by relative name. Every
/// returned `name` is accepted by [`crate::archive::BundleWriter::append`].
///
/// A missing root is treated as an empty data directory. Symlinks are not
/// followed.
pub fn collect_files(root: &Path) -> io::Result<Vec<DataFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;
        let Some(name) = entry_name(relative) else {
            tracing::warn!(path = %entry.path().display(), "Skipping file with non UTF-8 name");
            continue;
        };
        if check_entry_name(&name).is_err() {
            tracing::warn!(path = %entry.path().display(), "Skipping file the archive cannot name");
            continue;
        }
        let size = entry.metadata().map_err(io::Error::other)?.len();
        files.push(DataFile {
            name,
            path: entry.path().to_path_buf(),
            size,
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Staging directory an import for `job_id` unpacks into.
pub fn staging_dir(root: &Path, job_id: &str) -> PathBuf {
    sibling(root, &format!("import-{job_id}"))
}

/// Where the previous data lives during the swap.
pub fn backup_dir(root: &Path, job_id: &str) -> PathBuf {
    sibling(root, &format!("backup-{job_id}"))
}

fn sibling(root: &Path, suffix: &str) -> PathBuf {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    let parent = root.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{name}.{suffix}"))
}

/// Write `data` to `staging/relative`, creating parent directories.
pub fn write_staged(staging: &Path, relative: &Path, data: &[u8]) -> io::Result<()> {
    let target = staging.join(relative);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(target, data)
}

/// Replace `root` with `staged`.
///
/// The old directory is renamed aside first and restored if the second
/// rename fails. Removing the old copy afterwards is best effort.
pub fn swap_in(root: &Path, staged: &Path, job_id: &str) -> io::Result<()> {
    let backup = backup_dir(root, job_id);
    let had_data = root.exists();
    if had_data {
        std::fs::rename(root, &backup)?;
    }
    if let Err(e) = std::fs::rename(staged, root) {
        if had_data {
            if let Err(restore) = std::fs::rename(&backup, root) {
                tracing::error!(
                    error = %restore,
                    backup = %backup.display(),
                    "Failed to restore data directory after a failed swap"
                );
            }
        }
        return Err(e);
    }
    if had_data {
        if let Err(e) = std::fs::remove_dir_all(&backup) {
            tracing::warn!(error = %e, backup = %backup.display(), "Failed to remove replaced data");
        }
    }
    Ok(())
}

/// Repair leftovers of an import interrupted by a crash.
///
/// Staging directories are discarded. A backup directory means the swap was
/// cut short: if `root` is missing the backup is moved back, otherwise it is
/// stale and removed. Returns how many leftovers were handled.
pub fn recover(root: &Path) -> io::Result<usize> {
    let name = match root.file_name() {
        Some(n) => n.to_string_lossy().into_owned(),
        None => return Ok(0),
    };
    let parent = root.parent().unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        return Ok(0);
    }
    let staging_prefix = format!(".{name}.import-");
    let backup_prefix = format!(".{name}.backup-");
    let mut handled = 0;
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if file_name.starts_with(&staging_prefix) {
            tracing::warn!(path = %path.display(), "Discarding staging directory of an interrupted import");
            discard_dir(&path);
            handled += 1;
        } else if file_name.starts_with(&backup_prefix) {
            if root.exists() {
                discard_dir(&path);
            } else {
                tracing::warn!(backup = %path.display(), "Restoring data directory from an interrupted import");
                std::fs::rename(&path, root)?;
            }
            handled += 1;
        }
    }
    Ok(handled)
}

/// Remove a directory tree if it exists, logging instead of failing.
pub fn discard_dir(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_dir_all(path) {
            tracing::warn!(error = %e, path = %path.display(), "Failed to remove directory");
        }
    }
}
