//! Lab data file sync
//!
//! Keeps the `data_management` table of a SQLite database in agreement with
//! the files in a watched directory, and provides the record operations an
//! admin front end needs around it.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod records;
pub mod response;
pub mod scanner;
pub mod sync;

pub use config::SyncConfig;
pub use db::{NewRecord, RecordDatabase, RecordFilter, RecordStore, RecordUpdate};
pub use error::{SyncError, SyncErrorKind};
pub use models::{
    BatchUploadReport, BatchUploadSummary, DiskFile, DownloadBatch, FileInfo, FileLocation,
    FileRecord, RecordStatus, SyncAction, SyncItem, SyncMode, SyncReport, SyncSummary,
    UploadOutcome, UploadedFile,
};
pub use records::{RecordEdit, RecordInput, UploadRequest};
pub use response::ActionResponse;
pub use scanner::scan_directory;
pub use sync::Reconciler;
