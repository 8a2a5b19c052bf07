//! Scanner module - lists the files sitting in the watched directory

use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::models::{DiskFile, FileInfo};

/// List the regular files directly inside `root`
///
/// Each file is tagged with `prefix + file name`. Subdirectories are
/// skipped, hidden files are not. Results are sorted by file name.
pub fn scan_directory(root: &Path, prefix: &str) -> Result<Vec<DiskFile>, SyncError> {
    if !root.is_dir() {
        return Err(SyncError::directory_not_found(root.to_path_buf()));
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            SyncError::stat_failed(path, e.to_string())
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let metadata = entry
            .metadata()
            .map_err(|e| SyncError::stat_failed(path.to_path_buf(), e.to_string()))?;

        let name = entry.file_name().to_string_lossy().to_string();
        let modified = modified_time(&metadata)
            .map_err(|e| SyncError::stat_failed(path.to_path_buf(), e.to_string()))?;

        files.push(DiskFile {
            relative_path: format!("{}{}", prefix, name),
            name,
            path: path.to_path_buf(),
            modified,
            size: metadata.len(),
        });
    }

    log::debug!("Scanned {} files in {:?}", files.len(), root);
    Ok(files)
}

/// Whether a file is present on disk
pub fn file_exists(path: &Path) -> bool {
    path.exists()
}

/// Stat a single path
pub fn stat_file(path: &Path, relative_path: &str) -> Result<FileInfo, SyncError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SyncError::file_not_found(path.to_path_buf()));
        }
        Err(e) => return Err(SyncError::stat_failed(path.to_path_buf(), e.to_string())),
    };

    let modified = modified_time(&metadata)
        .map_err(|e| SyncError::stat_failed(path.to_path_buf(), e.to_string()))?;
    let created = metadata
        .created()
        .map(DateTime::<Utc>::from)
        .unwrap_or(modified);

    Ok(FileInfo {
        path: path.to_path_buf(),
        relative_path: relative_path.to_string(),
        size: metadata.len(),
        created,
        modified,
        is_file: metadata.is_file(),
        is_directory: metadata.is_dir(),
    })
}

fn modified_time(metadata: &Metadata) -> std::io::Result<DateTime<Utc>> {
    metadata.modified().map(DateTime::<Utc>::from)
}
