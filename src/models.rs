//! Core data models for data file sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::SyncError;

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Active,
    /// Set by hand only
    Inactive,
    /// Set by hand only
    Archived,
    /// File vanished from disk
    Deleted,
}

impl RecordStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
            RecordStatus::Archived => "archived",
            RecordStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(RecordStatus::Active),
            "inactive" => Ok(RecordStatus::Inactive),
            "archived" => Ok(RecordStatus::Archived),
            "deleted" => Ok(RecordStatus::Deleted),
            other => Err(SyncError::invalid_input(format!(
                "Unknown record status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the `data_management` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: i64,
    /// Display name, the file name for synced records
    pub title: String,
    pub description: Option<String>,
    /// `<prefix><file name>`, the join key with the disk
    pub relative_path: Option<String>,
    pub status: RecordStatus,
    /// False means soft-deleted whatever `status` says
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Freshness marker compared against file mtimes
    pub updated_at: DateTime<Utc>,
}

/// A regular file found directly inside the watched directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskFile {
    pub name: String,
    pub relative_path: String,
    /// Full path on disk
    #[serde(skip)]
    pub path: PathBuf,
    /// Modification time at full filesystem precision
    pub modified: DateTime<Utc>,
    pub size: u64,
}

impl DiskFile {
    /// Modification time at the precision records are stored at
    pub fn modified_millis(&self) -> DateTime<Utc> {
        truncate_to_millis(self.modified)
    }
}

/// Drop sub-millisecond precision
///
/// A file written before a sync must not look newer than the `updated_at`
/// that sync stamps on its record.
pub fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

/// Smallest whole millisecond at or after `time`
///
/// Lets an inclusive `>= time` bound run against millisecond columns
/// without widening the window.
pub fn ceil_to_millis(time: DateTime<Utc>) -> i64 {
    let millis = time.timestamp_millis();
    if time.timestamp_subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis + 1
    }
}

/// How a sync run classified a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
    Deleted,
    Unchanged,
}

impl SyncAction {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Created => "created",
            SyncAction::Updated => "updated",
            SyncAction::Deleted => "deleted",
            SyncAction::Unchanged => "unchanged",
        }
    }
}

/// Which reconciliation pass produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

/// A classified record, as stored after the mutation it caused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItem {
    pub action: SyncAction,
    pub record: FileRecord,
}

impl SyncItem {
    pub fn new(action: SyncAction, record: FileRecord) -> Self {
        Self { action, record }
    }
}

/// Counts shown to users after a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Files considered: the whole listing for full sync, candidates for incremental
    pub total: u64,
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Incremental runs do not track unchanged files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<u64>,
}

/// Result of a sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub created: Vec<SyncItem>,
    pub updated: Vec<SyncItem>,
    pub deleted: Vec<SyncItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<Vec<SyncItem>>,
    pub summary: SyncSummary,
    /// Wall time of the run in milliseconds
    pub duration_ms: u64,
}

impl SyncReport {
    /// Create an empty report for the given mode
    pub fn new(mode: SyncMode) -> Self {
        let unchanged = match mode {
            SyncMode::Full => Some(Vec::new()),
            SyncMode::Incremental => None,
        };
        Self {
            mode,
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            unchanged,
            summary: SyncSummary::default(),
            duration_ms: 0,
        }
    }

    /// File an item under its action
    pub fn push(&mut self, item: SyncItem) {
        match item.action {
            SyncAction::Created => self.created.push(item),
            SyncAction::Updated => self.updated.push(item),
            SyncAction::Deleted => self.deleted.push(item),
            SyncAction::Unchanged => self.unchanged.get_or_insert_with(Vec::new).push(item),
        }
    }

    /// Recompute the summary counts from the item lists
    pub fn finish(&mut self, total: u64) {
        self.summary = SyncSummary {
            total,
            created: self.created.len() as u64,
            updated: self.updated.len() as u64,
            deleted: self.deleted.len() as u64,
            unchanged: self.unchanged.as_ref().map(|items| items.len() as u64),
        };
    }

    /// Whether the run changed anything in the store
    pub fn has_changes(&self) -> bool {
        !(self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }

    /// One-line human summary
    pub fn describe(&self) -> String {
        let mut line = format!(
            "{} files: {} created, {} updated, {} deleted",
            self.summary.total, self.summary.created, self.summary.updated, self.summary.deleted
        );
        if let Some(unchanged) = self.summary.unchanged {
            line.push_str(&format!(", {} unchanged", unchanged));
        }
        line
    }
}

/// Stat details of a file under the watched directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: PathBuf,
    pub relative_path: String,
    pub size: u64,
    /// Birth time, falling back to mtime where the platform has none
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub is_file: bool,
    pub is_directory: bool,
}

/// Where a record's file lives, for handing it to a downloader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLocation {
    pub id: i64,
    pub file_name: String,
    pub file_size: u64,
    pub last_modified: DateTime<Utc>,
    pub relative_path: String,
    pub full_path: PathBuf,
}

/// Outcome of an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub record: FileRecord,
    /// Name the bytes were stored under
    pub file_name: String,
    pub file_size: u64,
}

/// Per-file result of a batch upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub success: bool,
    pub original_name: String,
    /// Stored name; absent when the upload failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<FileRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn stored(original_name: impl Into<String>, uploaded: UploadedFile) -> Self {
        Self {
            success: true,
            original_name: original_name.into(),
            file_name: Some(uploaded.file_name),
            file_size: uploaded.file_size,
            record: Some(uploaded.record),
            error: None,
        }
    }

    pub fn failed(original_name: impl Into<String>) -> Self {
        let original_name = original_name.into();
        Self {
            success: false,
            error: Some(format!("Failed to upload {}", original_name)),
            original_name,
            file_name: None,
            file_size: 0,
            record: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUploadSummary {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Result of a batch upload; one outcome per requested file, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUploadReport {
    pub results: Vec<UploadOutcome>,
    pub summary: BatchUploadSummary,
}

impl BatchUploadReport {
    pub fn push(&mut self, outcome: UploadOutcome) {
        self.results.push(outcome);
    }

    /// Recompute the summary counts from the outcomes
    pub fn finish(&mut self) {
        let successful = self.results.iter().filter(|r| r.success).count() as u64;
        let total = self.results.len() as u64;
        self.summary = BatchUploadSummary {
            total,
            successful,
            failed: total - successful,
        };
    }
}

/// Files resolved for a multi-record download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadBatch {
    pub files: Vec<FileLocation>,
    pub total_size: u64,
    pub is_single_file: bool,
    /// Titles of records whose file could not be served
    pub missing_files: Vec<String>,
}
