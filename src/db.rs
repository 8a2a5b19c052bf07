//! Database module - the record store the reconciler reads and writes

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::SyncError;
use crate::models::{ceil_to_millis, FileRecord, RecordStatus};

const SCHEMA_VERSION: i32 = 1;

const RECORD_COLUMNS: &str =
    "id, title, description, file_path_relative, status, is_active, created_at, updated_at";

/// Which records a query should return
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Only rows with `is_active = 1`
    pub active_only: bool,
    /// Relative path starts with this string
    pub path_prefix: Option<String>,
    /// Relative path equals this string
    pub relative_path: Option<String>,
    /// `updated_at >= since`
    pub updated_since: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn relative_path(mut self, path: impl Into<String>) -> Self {
        self.relative_path = Some(path.into());
        self
    }

    pub fn updated_since(mut self, since: DateTime<Utc>) -> Self {
        self.updated_since = Some(since);
        self
    }

    fn to_where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if self.active_only {
            clauses.push("is_active = 1".to_string());
        }
        if let Some(ref prefix) = self.path_prefix {
            // substr avoids LIKE wildcard escaping
            clauses.push("substr(file_path_relative, 1, length(?)) = ?".to_string());
            values.push(Value::Text(prefix.clone()));
            values.push(Value::Text(prefix.clone()));
        }
        if let Some(ref path) = self.relative_path {
            clauses.push("file_path_relative = ?".to_string());
            values.push(Value::Text(path.clone()));
        }
        if let Some(since) = self.updated_since {
            clauses.push("updated_at >= ?".to_string());
            values.push(Value::Integer(ceil_to_millis(since)));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// Fields for a new record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub title: String,
    pub description: Option<String>,
    pub relative_path: Option<String>,
    pub status: RecordStatus,
}

/// Partial update; `None` leaves a column alone
///
/// `updated_at` is always written: the store stamps the current time unless
/// the caller supplies one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub relative_path: Option<Option<String>>,
    pub status: Option<RecordStatus>,
    pub is_active: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    /// Only bump the freshness marker
    pub fn touch(now: DateTime<Utc>) -> Self {
        Self {
            updated_at: Some(now),
            ..Default::default()
        }
    }

    /// Bring a record back as active and fresh
    pub fn reactivate(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(RecordStatus::Active),
            is_active: Some(true),
            updated_at: Some(now),
            ..Default::default()
        }
    }

    /// Mark a record whose file is gone
    pub fn soft_delete(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(RecordStatus::Deleted),
            is_active: Some(false),
            updated_at: Some(now),
            ..Default::default()
        }
    }
}

/// Persistence the reconciler and record operations run against
pub trait RecordStore {
    /// Records matching the filter, oldest id first
    fn find_many(&self, filter: &RecordFilter) -> Result<Vec<FileRecord>, SyncError>;

    /// Best single match: active rows first, then the newest id
    fn find_first(&self, filter: &RecordFilter) -> Result<Option<FileRecord>, SyncError>;

    fn find_by_id(&self, id: i64) -> Result<Option<FileRecord>, SyncError>;

    /// Active records, newest first
    fn list_active(&self) -> Result<Vec<FileRecord>, SyncError>;

    /// Insert a record; `Conflict` if an active record owns its path
    fn create(&mut self, record: &NewRecord) -> Result<FileRecord, SyncError>;

    /// Apply a partial update; `RecordNotFound` if the id is unknown
    fn update(&mut self, id: i64, changes: &RecordUpdate) -> Result<FileRecord, SyncError>;
}

/// SQLite-backed record store
pub struct RecordDatabase {
    conn: Connection,
}

impl RecordDatabase {
    /// Open or create database
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        db.migrate_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS data_management (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                file_path_relative TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_data_management_path ON data_management(file_path_relative);
            CREATE INDEX IF NOT EXISTS idx_data_management_updated ON data_management(updated_at);
            ",
        )
    }

    /// Bring older databases up to the current schema version
    fn migrate_schema(&self) -> rusqlite::Result<()> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            // Older files may hold duplicate active paths; keep the newest one active.
            self.conn.execute_batch(
                "
                UPDATE data_management SET is_active = 0, status = 'deleted'
                WHERE is_active = 1 AND file_path_relative IS NOT NULL AND id NOT IN (
                    SELECT MAX(id) FROM data_management
                    WHERE is_active = 1 AND file_path_relative IS NOT NULL
                    GROUP BY file_path_relative
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_data_management_active_path
                    ON data_management(file_path_relative)
                    WHERE is_active = 1 AND file_path_relative IS NOT NULL;
                ",
            )?;
        }

        if version < SCHEMA_VERSION {
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        }
        Ok(())
    }

    /// Total rows, active or not
    pub fn record_count(&self) -> Result<u64, SyncError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM data_management", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn query(&self, sql: &str, values: &[Value]) -> Result<Vec<FileRecord>, SyncError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn conflict_or(err: rusqlite::Error, relative_path: Option<&str>) -> SyncError {
        let err = SyncError::from(err);
        match relative_path {
            Some(path) if err.kind == crate::error::SyncErrorKind::Conflict => {
                SyncError::conflict(path)
            }
            _ => err,
        }
    }
}

impl RecordStore for RecordDatabase {
    fn find_many(&self, filter: &RecordFilter) -> Result<Vec<FileRecord>, SyncError> {
        let (clause, values) = filter.to_where_clause();
        let sql = format!(
            "SELECT {} FROM data_management{} ORDER BY id ASC",
            RECORD_COLUMNS, clause
        );
        self.query(&sql, &values)
    }

    fn find_first(&self, filter: &RecordFilter) -> Result<Option<FileRecord>, SyncError> {
        let (clause, values) = filter.to_where_clause();
        let sql = format!(
            "SELECT {} FROM data_management{} ORDER BY is_active DESC, id DESC LIMIT 1",
            RECORD_COLUMNS, clause
        );
        Ok(self.query(&sql, &values)?.into_iter().next())
    }

    fn find_by_id(&self, id: i64) -> Result<Option<FileRecord>, SyncError> {
        let sql = format!("SELECT {} FROM data_management WHERE id = ?1", RECORD_COLUMNS);
        let record = self
            .conn
            .query_row(&sql, [id], record_from_row)
            .optional()?;
        Ok(record)
    }

    fn list_active(&self) -> Result<Vec<FileRecord>, SyncError> {
        let sql = format!(
            "SELECT {} FROM data_management WHERE is_active = 1 ORDER BY created_at DESC, id DESC",
            RECORD_COLUMNS
        );
        self.query(&sql, &[])
    }

    fn create(&mut self, record: &NewRecord) -> Result<FileRecord, SyncError> {
        let now = Utc::now().timestamp_millis();
        let is_active = true;
        self.conn
            .execute(
                "INSERT INTO data_management
                 (title, description, file_path_relative, status, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record.title,
                    record.description,
                    record.relative_path,
                    record.status.as_str(),
                    is_active,
                    now,
                    now,
                ],
            )
            .map_err(|e| Self::conflict_or(e, record.relative_path.as_deref()))?;

        let id = self.conn.last_insert_rowid();
        self.find_by_id(id)?
            .ok_or_else(|| SyncError::store(format!("Record {} vanished after insert", id)))
    }

    fn update(&mut self, id: i64, changes: &RecordUpdate) -> Result<FileRecord, SyncError> {
        let mut sets = Vec::new();
        let mut values = Vec::new();

        if let Some(ref title) = changes.title {
            sets.push("title = ?");
            values.push(Value::Text(title.clone()));
        }
        if let Some(ref description) = changes.description {
            sets.push("description = ?");
            values.push(optional_text(description));
        }
        if let Some(ref path) = changes.relative_path {
            sets.push("file_path_relative = ?");
            values.push(optional_text(path));
        }
        if let Some(status) = changes.status {
            sets.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(is_active) = changes.is_active {
            sets.push("is_active = ?");
            values.push(Value::Integer(is_active as i64));
        }
        sets.push("updated_at = ?");
        values.push(Value::Integer(
            changes.updated_at.unwrap_or_else(Utc::now).timestamp_millis(),
        ));
        values.push(Value::Integer(id));

        let sql = format!(
            "UPDATE data_management SET {} WHERE id = ?",
            sets.join(", ")
        );

        let affected = match self.conn.execute(&sql, params_from_iter(values.iter())) {
            Ok(affected) => affected,
            Err(e) => {
                // Path for the conflict message
                let conflict_path = match changes.relative_path {
                    Some(Some(ref path)) => Some(path.clone()),
                    _ => self
                        .find_by_id(id)
                        .ok()
                        .flatten()
                        .and_then(|r| r.relative_path),
                };
                return Err(Self::conflict_or(e, conflict_path.as_deref()));
            }
        };

        if affected == 0 {
            return Err(SyncError::record_not_found(id));
        }
        self.find_by_id(id)?
            .ok_or_else(|| SyncError::record_not_found(id))
    }
}

fn optional_text(value: &Option<String>) -> Value {
    match value {
        Some(text) => Value::Text(text.clone()),
        None => Value::Null,
    }
}

fn timestamp_from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(SyncError::store(format!("Timestamp out of range: {}", millis))),
        )
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let status: String = row.get(4)?;
    let status = status
        .parse::<RecordStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(FileRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        relative_path: row.get(3)?,
        status,
        is_active: row.get(5)?,
        created_at: timestamp_from_millis(6, row.get(6)?)?,
        updated_at: timestamp_from_millis(7, row.get(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncErrorKind;
    use chrono::Duration;

    fn new_record(path: &str) -> NewRecord {
        NewRecord {
            title: path.rsplit('/').next().unwrap_or(path).to_string(),
            description: None,
            relative_path: Some(path.to_string()),
            status: RecordStatus::Active,
        }
    }

    #[test]
    fn test_create_and_find() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let record = db.create(&new_record("test/a.txt")).unwrap();

        assert!(record.id > 0);
        assert!(record.is_active);
        assert_eq!(record.status, RecordStatus::Active);
        assert_eq!(record.created_at, record.updated_at);

        let found = db.find_by_id(record.id).unwrap().unwrap();
        assert_eq!(found, record);
        assert!(db.find_by_id(record.id + 100).unwrap().is_none());
        assert_eq!(db.record_count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_active_path_conflicts() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let first = db.create(&new_record("test/a.txt")).unwrap();

        let err = db.create(&new_record("test/a.txt")).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::Conflict);

        // Once the first is soft-deleted the path is free again
        db.update(first.id, &RecordUpdate::soft_delete(Utc::now()))
            .unwrap();
        let second = db.create(&new_record("test/a.txt")).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_filter_by_prefix_and_activity() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let a = db.create(&new_record("test/a.txt")).unwrap();
        db.create(&new_record("other/b.txt")).unwrap();
        db.create(&new_record("test_x/c.txt")).unwrap();
        let d = db.create(&new_record("test/d.txt")).unwrap();
        db.update(d.id, &RecordUpdate::soft_delete(Utc::now()))
            .unwrap();

        let all = db
            .find_many(&RecordFilter::new().path_prefix("test/"))
            .unwrap();
        assert_eq!(all.len(), 2);

        let active = db
            .find_many(&RecordFilter::new().active().path_prefix("test/"))
            .unwrap();
        assert_eq!(active, vec![db.find_by_id(a.id).unwrap().unwrap()]);
    }

    #[test]
    fn test_prefix_is_literal() {
        let mut db = RecordDatabase::open_memory().unwrap();
        db.create(&new_record("t%st/a.txt")).unwrap();
        db.create(&new_record("test/b.txt")).unwrap();

        let found = db
            .find_many(&RecordFilter::new().path_prefix("t%st/"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative_path.as_deref(), Some("t%st/a.txt"));
    }

    #[test]
    fn test_filter_updated_since() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let now = Utc::now();
        let old = db.create(&new_record("test/old.txt")).unwrap();
        let fresh = db.create(&new_record("test/fresh.txt")).unwrap();
        db.update(old.id, &RecordUpdate::touch(now - Duration::hours(2)))
            .unwrap();
        db.update(fresh.id, &RecordUpdate::touch(now)).unwrap();

        let found = db
            .find_many(&RecordFilter::new().updated_since(now - Duration::hours(1)))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, fresh.id);

        // Boundary is inclusive
        let found = db
            .find_many(&RecordFilter::new().updated_since(now))
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_updated_since_keeps_sub_millisecond_bound() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let record = db.create(&new_record("test/a.txt")).unwrap();
        let stamp = DateTime::from_timestamp(Utc::now().timestamp() - 60, 0).unwrap();
        db.update(record.id, &RecordUpdate::touch(stamp)).unwrap();

        // Stored at stamp, which is earlier than stamp + 300us
        let found = db
            .find_many(&RecordFilter::new().updated_since(stamp + Duration::microseconds(300)))
            .unwrap();
        assert!(found.is_empty());

        let found = db
            .find_many(&RecordFilter::new().updated_since(stamp))
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_update_conflict_names_new_path() {
        let mut db = RecordDatabase::open_memory().unwrap();
        db.create(&new_record("test/a.txt")).unwrap();
        let b = db.create(&new_record("test/b.txt")).unwrap();

        let err = db
            .update(
                b.id,
                &RecordUpdate {
                    relative_path: Some(Some("test/a.txt".to_string())),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::Conflict);
        assert!(err.message.contains("test/a.txt"));

        let b = db.find_by_id(b.id).unwrap().unwrap();
        assert_eq!(b.relative_path.as_deref(), Some("test/b.txt"));
    }

    #[test]
    fn test_reactivate_conflict_names_stored_path() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let old = db.create(&new_record("test/a.txt")).unwrap();
        db.update(old.id, &RecordUpdate::soft_delete(Utc::now()))
            .unwrap();
        db.create(&new_record("test/a.txt")).unwrap();

        let err = db
            .update(old.id, &RecordUpdate::reactivate(Utc::now()))
            .unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::Conflict);
        assert!(err.message.contains("test/a.txt"));
        assert!(!db.find_by_id(old.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn test_find_first_prefers_active_then_newest() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let first = db.create(&new_record("test/a.txt")).unwrap();
        db.update(first.id, &RecordUpdate::soft_delete(Utc::now()))
            .unwrap();
        let second = db.create(&new_record("test/a.txt")).unwrap();
        db.update(second.id, &RecordUpdate::soft_delete(Utc::now()))
            .unwrap();

        let filter = RecordFilter::new().relative_path("test/a.txt");
        assert_eq!(db.find_first(&filter).unwrap().unwrap().id, second.id);

        db.update(first.id, &RecordUpdate::reactivate(Utc::now()))
            .unwrap();
        assert_eq!(db.find_first(&filter).unwrap().unwrap().id, first.id);
    }

    #[test]
    fn test_partial_update() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let record = db.create(&new_record("test/a.txt")).unwrap();
        let stamp = record.updated_at + Duration::seconds(5);

        let updated = db
            .update(
                record.id,
                &RecordUpdate {
                    title: Some("renamed".to_string()),
                    description: Some(Some("notes".to_string())),
                    updated_at: Some(stamp),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.description.as_deref(), Some("notes"));
        assert_eq!(updated.relative_path, record.relative_path);
        assert_eq!(updated.status, RecordStatus::Active);
        assert_eq!(updated.updated_at, stamp);
        assert_eq!(updated.created_at, record.created_at);

        let cleared = db
            .update(
                record.id,
                &RecordUpdate {
                    description: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(cleared.description.is_none());
    }

    #[test]
    fn test_update_missing_record() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let err = db.update(42, &RecordUpdate::touch(Utc::now())).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::RecordNotFound);
    }

    #[test]
    fn test_list_active_newest_first() {
        let mut db = RecordDatabase::open_memory().unwrap();
        let a = db.create(&new_record("test/a.txt")).unwrap();
        let b = db.create(&new_record("test/b.txt")).unwrap();
        let c = db.create(&new_record("test/c.txt")).unwrap();
        db.update(
            b.id,
            &RecordUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

        let ids: Vec<i64> = db.list_active().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c.id, a.id]);
    }

    #[test]
    fn test_open_on_disk_reopens_schema() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested").join("main.db");
        {
            let mut db = RecordDatabase::open(&path).unwrap();
            db.create(&new_record("test/a.txt")).unwrap();
        }
        let db = RecordDatabase::open(&path).unwrap();
        assert_eq!(db.record_count().unwrap(), 1);
    }
}
