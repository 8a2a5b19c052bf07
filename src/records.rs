//! Record management - hand edits, uploads and file lookups
//!
//! These operations write the same table the reconciler reads. Whatever they
//! leave behind is simply prior state for the next sync.

use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;

use crate::config::SyncConfig;
use crate::db::{NewRecord, RecordStore, RecordUpdate};
use crate::error::{SyncError, SyncErrorKind};
use crate::models::{
    BatchUploadReport, DownloadBatch, FileInfo, FileLocation, FileRecord, RecordStatus,
    UploadOutcome, UploadedFile,
};
use crate::scanner;

/// Input for a hand-made record
#[derive(Debug, Clone, Default)]
pub struct RecordInput {
    pub title: String,
    pub description: Option<String>,
    pub relative_path: Option<String>,
    pub status: Option<RecordStatus>,
}

/// One file of a batch upload
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub name: String,
    pub contents: Vec<u8>,
}

/// Fields to change on an existing record
#[derive(Debug, Clone, Default)]
pub struct RecordEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub relative_path: Option<String>,
    pub status: Option<RecordStatus>,
}

/// Active records, newest first
pub fn list_records<S: RecordStore>(store: &S) -> Result<Vec<FileRecord>, SyncError> {
    store.list_active()
}

pub fn get_record<S: RecordStore>(store: &S, id: i64) -> Result<FileRecord, SyncError> {
    store
        .find_by_id(id)?
        .ok_or_else(|| SyncError::record_not_found(id))
}

pub fn create_record<S: RecordStore>(
    store: &mut S,
    input: RecordInput,
) -> Result<FileRecord, SyncError> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(SyncError::invalid_input("Title is required"));
    }

    let record = store.create(&NewRecord {
        title: title.to_string(),
        description: input.description,
        relative_path: input.relative_path,
        status: input.status.unwrap_or_default(),
    })?;
    log::info!("Created record {} ({})", record.id, record.title);
    Ok(record)
}

pub fn update_record<S: RecordStore>(
    store: &mut S,
    id: i64,
    edit: RecordEdit,
) -> Result<FileRecord, SyncError> {
    if let Some(ref title) = edit.title {
        if title.trim().is_empty() {
            return Err(SyncError::invalid_input("Title cannot be empty"));
        }
    }

    let changes = RecordUpdate {
        title: edit.title.map(|t| t.trim().to_string()),
        description: edit.description.map(Some),
        relative_path: edit.relative_path.map(Some),
        status: edit.status,
        is_active: None,
        updated_at: Some(Utc::now()),
    };
    let record = store.update(id, &changes)?;
    log::info!("Updated record {}", record.id);
    Ok(record)
}

/// Hide a record; its status text is left as is
pub fn delete_record<S: RecordStore>(store: &mut S, id: i64) -> Result<FileRecord, SyncError> {
    let changes = RecordUpdate {
        is_active: Some(false),
        ..Default::default()
    };
    let record = store.update(id, &changes)?;
    log::info!("Soft-deleted record {}", record.id);
    Ok(record)
}

/// Stat a file in the watched directory by its record path
pub fn file_info(config: &SyncConfig, relative_path: &str) -> Result<FileInfo, SyncError> {
    let path = config.disk_path_for(relative_path)?;
    scanner::stat_file(&path, relative_path)
}

/// Resolve a record to the file a downloader should serve
pub fn locate_record_file<S: RecordStore>(
    store: &S,
    config: &SyncConfig,
    id: i64,
) -> Result<FileLocation, SyncError> {
    let record = get_record(store, id)?;
    locate(config, record)
}

/// Resolve several active records at once
///
/// Records without a usable file are listed by title in `missing_files`
/// instead of failing the batch.
pub fn locate_record_files<S: RecordStore>(
    store: &S,
    config: &SyncConfig,
    ids: &[i64],
) -> Result<DownloadBatch, SyncError> {
    let ids: BTreeSet<i64> = ids.iter().copied().collect();
    let mut records = Vec::new();
    for id in ids {
        if let Some(record) = store.find_by_id(id)?.filter(|r| r.is_active) {
            records.push(record);
        }
    }
    if records.is_empty() {
        return Err(SyncError::new(
            SyncErrorKind::RecordNotFound,
            None,
            "No valid records found",
        ));
    }

    let mut files = Vec::new();
    let mut missing_files = Vec::new();
    for record in records {
        let label = if record.title.is_empty() {
            format!("Record {}", record.id)
        } else {
            record.title.clone()
        };
        match locate(config, record) {
            Ok(location) => files.push(location),
            Err(e) => {
                log::debug!("Cannot serve {}: {}", label, e);
                missing_files.push(label);
            }
        }
    }
    if files.is_empty() {
        return Err(SyncError::new(
            SyncErrorKind::FileNotFound,
            None,
            "No files could be downloaded",
        ));
    }

    Ok(DownloadBatch {
        total_size: files.iter().map(|f| f.file_size).sum(),
        is_single_file: files.len() == 1,
        files,
        missing_files,
    })
}

fn locate(config: &SyncConfig, record: FileRecord) -> Result<FileLocation, SyncError> {
    let relative_path = record.relative_path.ok_or_else(|| {
        SyncError::invalid_input("No file path associated with this record")
    })?;

    let info = file_info(config, &relative_path)?;
    let file_name = if record.title.is_empty() {
        info.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    } else {
        record.title
    };

    Ok(FileLocation {
        id: record.id,
        file_name,
        file_size: info.size,
        last_modified: info.modified,
        relative_path,
        full_path: info.path,
    })
}

/// Store uploaded bytes in the watched directory and record them
///
/// The stored name gets a millisecond timestamp so repeated uploads of the
/// same file never collide.
pub fn upload_file<S: RecordStore>(
    store: &mut S,
    config: &SyncConfig,
    original_name: &str,
    contents: &[u8],
    title: Option<String>,
    description: Option<String>,
) -> Result<UploadedFile, SyncError> {
    let original = Path::new(original_name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| SyncError::invalid_input("No file provided"))?;

    let root = config.watched_root();
    std::fs::create_dir_all(&root)?;

    let file_name = unused_name(&root, &original, Utc::now().timestamp_millis());
    let path = root.join(&file_name);
    std::fs::write(&path, contents)?;

    let record = store.create(&NewRecord {
        title: title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| original.clone()),
        description: Some(
            description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| format!("Uploaded file: {}", original)),
        ),
        relative_path: Some(config.relative_path_for(&file_name)),
        status: RecordStatus::Active,
    })?;
    log::info!("Uploaded {} as {}", original, file_name);

    Ok(UploadedFile {
        record,
        file_name,
        file_size: contents.len() as u64,
    })
}

/// Upload several files; one failure does not stop the rest
pub fn upload_files<S: RecordStore>(
    store: &mut S,
    config: &SyncConfig,
    requests: Vec<UploadRequest>,
) -> Result<BatchUploadReport, SyncError> {
    if requests.is_empty() {
        return Err(SyncError::invalid_input("No files provided"));
    }
    std::fs::create_dir_all(config.watched_root())?;

    let mut report = BatchUploadReport::default();
    for request in requests {
        let result = upload_file(store, config, &request.name, &request.contents, None, None);
        let outcome = match result {
            Ok(uploaded) => UploadOutcome::stored(request.name, uploaded),
            Err(e) => {
                log::error!("Error uploading file {}: {}", request.name, e);
                UploadOutcome::failed(request.name)
            }
        };
        report.push(outcome);
    }
    report.finish();
    log::info!(
        "Uploaded {} of {} files",
        report.summary.successful,
        report.summary.total
    );
    Ok(report)
}

/// Timestamped name not yet taken in `root`
fn unused_name(root: &Path, original: &str, mut millis: i64) -> String {
    loop {
        let name = timestamped_name(original, millis);
        if !root.join(&name).exists() {
            return name;
        }
        millis += 1;
    }
}

/// `report.csv` + 1700000000000 -> `report_1700000000000.csv`
fn timestamped_name(original: &str, millis: i64) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| original.to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, millis, ext.to_string_lossy()),
        None => format!("{}_{}", stem, millis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordDatabase;
    use crate::error::SyncErrorKind;
    use crate::sync::Reconciler;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SyncConfig, RecordDatabase) {
        let temp = TempDir::new().unwrap();
        let config = SyncConfig::builder()
            .base_path(temp.path().to_path_buf())
            .data_dir(PathBuf::from("raw"))
            .build();
        (temp, config, RecordDatabase::open_memory().unwrap())
    }

    #[test]
    fn test_timestamped_name() {
        assert_eq!(timestamped_name("report.csv", 17), "report_17.csv");
        assert_eq!(timestamped_name("README", 17), "README_17");
        assert_eq!(timestamped_name("a.tar.gz", 5), "a.tar_5.gz");
    }

    #[test]
    fn test_create_requires_title() {
        let (_temp, _config, mut db) = setup();
        let err = create_record(
            &mut db,
            RecordInput {
                title: "  ".to_string(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::InvalidInput);
    }

    #[test]
    fn test_crud_flow() {
        let (_temp, _config, mut db) = setup();
        let record = create_record(
            &mut db,
            RecordInput {
                title: "Run 12".to_string(),
                description: Some("calibration".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(record.status, RecordStatus::Active);
        assert!(record.relative_path.is_none());

        let edited = update_record(
            &mut db,
            record.id,
            RecordEdit {
                status: Some(RecordStatus::Archived),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(edited.status, RecordStatus::Archived);
        assert_eq!(edited.title, "Run 12");
        assert_eq!(edited.description.as_deref(), Some("calibration"));

        assert_eq!(list_records(&db).unwrap().len(), 1);
        let deleted = delete_record(&mut db, record.id).unwrap();
        assert!(!deleted.is_active);
        assert_eq!(deleted.status, RecordStatus::Archived);
        assert!(list_records(&db).unwrap().is_empty());

        // Still reachable by id
        assert_eq!(get_record(&db, record.id).unwrap().id, record.id);
        let err = get_record(&db, 999).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::RecordNotFound);
        let err = delete_record(&mut db, 999).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::RecordNotFound);
    }

    #[test]
    fn test_upload_then_sync_sees_it_unchanged() {
        let (_temp, config, mut db) = setup();
        let uploaded = upload_file(&mut db, &config, "data.csv", b"a,b\n1,2\n", None, None).unwrap();

        assert!(uploaded.file_name.starts_with("data_"));
        assert!(uploaded.file_name.ends_with(".csv"));
        assert_eq!(uploaded.file_size, 8);
        assert_eq!(uploaded.record.title, "data.csv");
        assert_eq!(
            uploaded.record.description.as_deref(),
            Some("Uploaded file: data.csv")
        );
        let relative = uploaded.record.relative_path.clone().unwrap();
        assert_eq!(relative, format!("test/{}", uploaded.file_name));

        let info = file_info(&config, &relative).unwrap();
        assert_eq!(info.size, 8);

        let mut reconciler = Reconciler::new(db, config);
        let report = reconciler.full_sync().unwrap();
        assert_eq!(report.summary.created, 0);
        assert_eq!(report.summary.unchanged, Some(1));
    }

    #[test]
    fn test_upload_rejects_empty_name() {
        let (_temp, config, mut db) = setup();
        let err = upload_file(&mut db, &config, "", b"x", None, None).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::InvalidInput);
    }

    #[test]
    fn test_repeated_uploads_get_distinct_names() {
        let (_temp, config, mut db) = setup();
        let first = upload_file(&mut db, &config, "run.csv", b"1", None, None).unwrap();
        let second = upload_file(&mut db, &config, "run.csv", b"2", None, None).unwrap();

        assert_ne!(first.file_name, second.file_name);
        assert_eq!(fs::read(config.watched_root().join(&first.file_name)).unwrap(), b"1");
        assert_eq!(fs::read(config.watched_root().join(&second.file_name)).unwrap(), b"2");
    }

    #[test]
    fn test_upload_files_continues_past_failures() {
        let (_temp, config, mut db) = setup();
        let requests = vec![
            UploadRequest {
                name: "a.csv".to_string(),
                contents: b"abc".to_vec(),
            },
            UploadRequest {
                name: String::new(),
                contents: b"lost".to_vec(),
            },
            UploadRequest {
                name: "b.txt".to_string(),
                contents: b"b".to_vec(),
            },
        ];

        let report = upload_files(&mut db, &config, requests).unwrap();
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.successful, 2);
        assert_eq!(report.summary.failed, 1);

        let a = &report.results[0];
        assert!(a.success);
        assert_eq!(a.original_name, "a.csv");
        assert_eq!(a.file_size, 3);
        assert_eq!(a.record.as_ref().unwrap().title, "a.csv");
        assert!(!report.results[1].success);
        assert_eq!(report.results[1].error.as_deref(), Some("Failed to upload "));
        assert!(report.results[2].success);

        assert_eq!(list_records(&db).unwrap().len(), 2);
    }

    #[test]
    fn test_upload_files_requires_files() {
        let (_temp, config, mut db) = setup();
        let err = upload_files(&mut db, &config, Vec::new()).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::InvalidInput);
        assert_eq!(err.message, "No files provided");
    }

    #[test]
    fn test_locate_record_files() {
        let (_temp, config, mut db) = setup();
        fs::create_dir_all(config.watched_root()).unwrap();
        fs::write(config.watched_root().join("a.bin"), b"1234").unwrap();
        fs::write(config.watched_root().join("b.bin"), b"56").unwrap();

        let mut add = |title: &str, path: Option<&str>| {
            create_record(
                &mut db,
                RecordInput {
                    title: title.to_string(),
                    relative_path: path.map(str::to_string),
                    ..Default::default()
                },
            )
            .unwrap()
            .id
        };
        let a = add("Sample A", Some("test/a.bin"));
        let b = add("Sample B", Some("test/b.bin"));
        let notes = add("Notes", None);
        let gone = add("Gone", Some("test/gone.bin"));
        let hidden = add("Hidden", Some("test/a.bin.old"));
        delete_record(&mut db, hidden).unwrap();

        let batch = locate_record_files(&db, &config, &[b, a, notes, gone, hidden, a]).unwrap();
        let ids: Vec<i64> = batch.files.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(batch.total_size, 6);
        assert!(!batch.is_single_file);
        assert_eq!(batch.missing_files, vec!["Notes", "Gone"]);

        let single = locate_record_files(&db, &config, &[a]).unwrap();
        assert!(single.is_single_file);
        assert!(single.missing_files.is_empty());

        let err = locate_record_files(&db, &config, &[notes, gone]).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::FileNotFound);
        assert_eq!(err.message, "No files could be downloaded");

        let err = locate_record_files(&db, &config, &[hidden, 999]).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::RecordNotFound);
        assert_eq!(err.message, "No valid records found");
    }

    #[test]
    fn test_locate_record_file() {
        let (_temp, config, mut db) = setup();
        fs::create_dir_all(config.watched_root()).unwrap();
        fs::write(config.watched_root().join("a.bin"), b"1234").unwrap();

        let with_file = create_record(
            &mut db,
            RecordInput {
                title: "Sample A".to_string(),
                relative_path: Some("test/a.bin".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let location = locate_record_file(&db, &config, with_file.id).unwrap();
        assert_eq!(location.file_name, "Sample A");
        assert_eq!(location.file_size, 4);
        assert_eq!(location.full_path, config.watched_root().join("a.bin"));

        let no_path = create_record(
            &mut db,
            RecordInput {
                title: "Notes".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let err = locate_record_file(&db, &config, no_path.id).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::InvalidInput);

        let missing = create_record(
            &mut db,
            RecordInput {
                title: "Gone".to_string(),
                relative_path: Some("test/gone.bin".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let err = locate_record_file(&db, &config, missing.id).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::FileNotFound);
    }
}
