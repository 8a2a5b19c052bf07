//! Reconciler - brings the record store in line with the watched directory
//!
//! Two passes share the same primitives:
//!
//! - [`Reconciler::full_sync`] diffs the whole listing against every active
//!   record under the prefix. It is the authoritative pass.
//! - [`Reconciler::incremental_sync`] only looks at files modified after a
//!   watermark and at records touched since then. A file removed from disk
//!   whose record predates the watermark goes unnoticed until the next full
//!   sync.
//!
//! Every classification issues its own store mutation. Nothing wraps a run
//! in a transaction, so an error midway leaves earlier mutations committed.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Instant;

use crate::config::SyncConfig;
use crate::db::{NewRecord, RecordFilter, RecordStore, RecordUpdate};
use crate::error::{SyncError, SyncErrorKind};
use crate::models::{DiskFile, FileRecord, RecordStatus, SyncAction, SyncItem, SyncMode, SyncReport};
use crate::response::ActionResponse;
use crate::scanner;

/// Runs sync passes against an injected record store
///
/// Sync entry points take `&mut self`, so a reconciler never runs two passes
/// at once. Runs from separate processes are kept apart by the store's unique
/// index on active paths: a losing create is adopted as an update.
pub struct Reconciler<S: RecordStore> {
    store: S,
    config: SyncConfig,
}

impl<S: RecordStore> Reconciler<S> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Hand the store back to the caller
    pub fn into_store(self) -> S {
        self.store
    }

    /// Reconcile every active record under the prefix with the directory listing
    pub fn full_sync(&mut self) -> Result<SyncReport, SyncError> {
        let start = Instant::now();
        let root = self.config.watched_root();
        let files = scanner::scan_directory(&root, &self.config.prefix)?;
        log::info!("Full sync of {:?}: {} files on disk", root, files.len());

        let existing = self
            .store
            .find_many(&RecordFilter::new().active().path_prefix(self.config.prefix.clone()))?;
        let mut remaining: HashMap<String, FileRecord> = existing
            .into_iter()
            .filter_map(|record| record.relative_path.clone().map(|path| (path, record)))
            .collect();

        let mut report = SyncReport::new(SyncMode::Full);

        for file in &files {
            let item = match remaining.remove(&file.relative_path) {
                None => self.create_from_disk(file)?,
                Some(record) if file.modified_millis() > record.updated_at => {
                    let record = self.store.update(record.id, &RecordUpdate::touch(Utc::now()))?;
                    SyncItem::new(SyncAction::Updated, record)
                }
                Some(record) => SyncItem::new(SyncAction::Unchanged, record),
            };
            log::debug!("{} {}", item.action.as_str(), file.relative_path);
            report.push(item);
        }

        let mut missing: Vec<FileRecord> = remaining.into_values().collect();
        missing.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        for record in missing {
            report.push(self.soft_delete(record)?);
        }

        report.finish(files.len() as u64);
        report.duration_ms = start.elapsed().as_millis() as u64;
        log::info!("Full sync finished: {}", report.describe());
        Ok(report)
    }

    /// Reconcile only what plausibly changed since `last_sync_time`
    ///
    /// Without a watermark this is a full sync.
    pub fn incremental_sync(
        &mut self,
        last_sync_time: Option<DateTime<Utc>>,
    ) -> Result<SyncReport, SyncError> {
        let root = self.config.watched_root();
        if !root.is_dir() {
            return Err(SyncError::directory_not_found(root));
        }

        let since = match last_sync_time {
            Some(since) => since,
            None => {
                log::info!("No previous sync time, running full sync");
                return self.full_sync();
            }
        };

        let start = Instant::now();
        let candidates: Vec<DiskFile> = scanner::scan_directory(&root, &self.config.prefix)?
            .into_iter()
            // Full precision: a watermark may carry sub-millisecond digits
            .filter(|file| file.modified > since)
            .collect();
        log::info!(
            "Incremental sync of {:?} since {}: {} candidate files",
            root,
            since.to_rfc3339(),
            candidates.len()
        );

        let mut report = SyncReport::new(SyncMode::Incremental);

        for file in &candidates {
            let existing = self
                .store
                .find_first(&RecordFilter::new().relative_path(file.relative_path.clone()))?;
            let item = match existing {
                None => self.create_from_disk(file)?,
                Some(record) => {
                    let record = self
                        .store
                        .update(record.id, &RecordUpdate::reactivate(Utc::now()))?;
                    SyncItem::new(SyncAction::Updated, record)
                }
            };
            log::debug!("{} {}", item.action.as_str(), file.relative_path);
            report.push(item);
        }

        // Only records touched since the watermark are checked against the disk.
        let touched = self.store.find_many(
            &RecordFilter::new()
                .active()
                .path_prefix(self.config.prefix.clone())
                .updated_since(since),
        )?;
        for record in touched {
            let Some(ref relative_path) = record.relative_path else {
                continue;
            };
            let path = match self.config.disk_path_for(relative_path) {
                Ok(path) => path,
                Err(e) => {
                    log::warn!("Skipping record {}: {}", record.id, e);
                    continue;
                }
            };
            if !scanner::file_exists(&path) {
                report.push(self.soft_delete(record)?);
            }
        }

        report.finish(candidates.len() as u64);
        report.duration_ms = start.elapsed().as_millis() as u64;
        log::info!("Incremental sync finished: {}", report.describe());
        Ok(report)
    }

    /// Full sync wrapped in the caller-facing envelope
    pub fn full_sync_response(&mut self) -> ActionResponse<SyncReport> {
        ActionResponse::from_result(self.full_sync(), "Failed to scan and sync data files")
    }

    /// Incremental sync wrapped in the caller-facing envelope
    pub fn incremental_sync_response(
        &mut self,
        last_sync_time: Option<DateTime<Utc>>,
    ) -> ActionResponse<SyncReport> {
        ActionResponse::from_result(
            self.incremental_sync(last_sync_time),
            "Failed to incremental sync data files",
        )
    }

    fn create_from_disk(&mut self, file: &DiskFile) -> Result<SyncItem, SyncError> {
        let new_record = NewRecord {
            title: file.name.clone(),
            description: Some(format!("Auto-synced file from {}", file.relative_path)),
            relative_path: Some(file.relative_path.clone()),
            status: RecordStatus::Active,
        };

        match self.store.create(&new_record) {
            Ok(record) => Ok(SyncItem::new(SyncAction::Created, record)),
            Err(err) if err.kind == SyncErrorKind::Conflict => {
                // Another run created it after our read; take theirs over.
                log::warn!(
                    "{} was created concurrently, adopting existing record",
                    file.relative_path
                );
                let existing = self
                    .store
                    .find_first(
                        &RecordFilter::new()
                            .active()
                            .relative_path(file.relative_path.clone()),
                    )?
                    .ok_or(err)?;
                let record = self
                    .store
                    .update(existing.id, &RecordUpdate::touch(Utc::now()))?;
                Ok(SyncItem::new(SyncAction::Updated, record))
            }
            Err(err) => Err(err),
        }
    }

    fn soft_delete(&mut self, record: FileRecord) -> Result<SyncItem, SyncError> {
        log::debug!("deleted {}", record.relative_path.as_deref().unwrap_or(""));
        let record = self
            .store
            .update(record.id, &RecordUpdate::soft_delete(Utc::now()))?;
        Ok(SyncItem::new(SyncAction::Deleted, record))
    }
}
