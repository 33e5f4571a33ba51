use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, ToSql};

use super::data::{PhotoRecord, PhotoUpdate, Status};
use crate::error::{Error, Result};
use crate::ingest::addresser::ContentId;

/// Default page size for listings
pub const PAGE_SIZE: usize = 20;

/// Durable photo records keyed by content id.
///
/// Creation is atomic-or-rejected: a second `create` for the same id fails
/// with `StoreConflict`. `finish` performs the one allowed status transition
/// together with the fields it carries, so readers never see a half-written
/// terminal record.
pub trait PhotoStore: Send + Sync {
    fn create(&self, record: &PhotoRecord) -> Result<()>;
    fn get(&self, id: &ContentId) -> Result<Option<PhotoRecord>>;
    fn exists(&self, id: &ContentId) -> Result<bool>;
    /// Hard delete (used when an upload overwrites an existing id)
    fn delete(&self, id: &ContentId) -> Result<bool>;
    fn finish(&self, id: &ContentId, status: Status, update: Option<&PhotoUpdate>) -> Result<()>;
    fn set_deleted(&self, id: &ContentId, deleted: bool) -> Result<()>;
    fn add_tag(&self, id: &ContentId, tag: &str) -> Result<()>;
    fn remove_tag(&self, id: &ContentId, tag: &str) -> Result<()>;
    fn query(&self, query: &PhotoQuery) -> Result<Vec<PhotoRecord>>;
    fn count(&self, filter: &PhotoFilter) -> Result<usize>;
}

/// Field filters for listings; `None` means "don't care"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoFilter {
    pub status: Option<Status>,
    pub deleted: Option<bool>,
    /// Matches records with any tag containing this substring
    pub tag: Option<String>,
}

/// One page of a filtered listing, oldest upload first so new uploads land
/// on the last page
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoQuery {
    pub filter: PhotoFilter,
    pub start: usize,
    pub limit: usize,
}

impl Default for PhotoQuery {
    fn default() -> Self {
        Self {
            filter: PhotoFilter::default(),
            start: 0,
            limit: PAGE_SIZE,
        }
    }
}

/// The Library manages the SQLite photo catalog.
pub struct Library {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Library {
    /// Open or create the catalog at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        tracing::info!(path = %db_path.display(), "catalog opened");

        Self::with_connection(conn, Some(db_path.to_path_buf()))
    }

    /// Throwaway catalog, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        let library = Library {
            conn: Mutex::new(conn),
            db_path,
        };
        library.init_schema()?;
        Ok(library)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates all tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS photos (
                 id                  TEXT PRIMARY KEY NOT NULL,
                 uploaded_at         INTEGER NOT NULL,
                 taken_at            INTEGER,
                 width               INTEGER NOT NULL DEFAULT 0,
                 height              INTEGER NOT NULL DEFAULT 0,
                 megapixels          REAL NOT NULL DEFAULT 0,
                 lat                 REAL,
                 long                REAL,
                 cam_serial          TEXT,
                 cam_make            TEXT,
                 cam_model           TEXT,
                 status              TEXT NOT NULL,
                 status_updated_at   INTEGER NOT NULL,
                 deleted             INTEGER NOT NULL DEFAULT 0
             );

             CREATE TABLE IF NOT EXISTS photo_tags (
                 photo_id    TEXT NOT NULL,
                 tag         TEXT NOT NULL,
                 PRIMARY KEY (photo_id, tag),
                 FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
             );

             CREATE INDEX IF NOT EXISTS idx_photos_status ON photos(status);
             CREATE INDEX IF NOT EXISTS idx_photos_uploaded_at ON photos(uploaded_at);
             CREATE INDEX IF NOT EXISTS idx_photos_taken_at ON photos(taken_at);
             CREATE INDEX IF NOT EXISTS idx_photos_cam_serial ON photos(cam_serial);",
        )?;

        tracing::debug!("catalog schema initialized");
        Ok(())
    }

    fn tags_of(conn: &Connection, id: &ContentId) -> Result<BTreeSet<String>> {
        let mut stmt = conn.prepare_cached("SELECT tag FROM photo_tags WHERE photo_id = ?1")?;
        let tags = stmt
            .query_map([id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(tags)
    }

    fn exists_locked(conn: &Connection, id: &ContentId) -> Result<bool> {
        let found = conn
            .query_row("SELECT 1 FROM photos WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}

const COLUMNS: &str = "id, uploaded_at, taken_at, width, height, megapixels, lat, long, \
                       cam_serial, cam_make, cam_model, status, status_updated_at, deleted";

/// SQLite integers are signed; larger page bounds would wrap to "no limit"
fn bound(n: usize) -> Result<i64> {
    i64::try_from(n).map_err(|_| Error::InvalidInput("page bounds out of range"))
}

fn to_millis(t: &DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            "timestamp out of range".into(),
        )
    })
}

/// Map a row selected with COLUMNS; tags are filled in separately
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PhotoRecord> {
    Ok(PhotoRecord {
        id: row.get(0)?,
        uploaded_at: from_millis(row.get(1)?)?,
        taken_at: row.get::<_, Option<i64>>(2)?.map(from_millis).transpose()?,
        width: row.get(3)?,
        height: row.get(4)?,
        megapixels: row.get(5)?,
        lat: row.get(6)?,
        long: row.get(7)?,
        cam_serial: row.get(8)?,
        cam_make: row.get(9)?,
        cam_model: row.get(10)?,
        status: row.get(11)?,
        status_updated_at: from_millis(row.get(12)?)?,
        deleted: row.get(13)?,
        tags: BTreeSet::new(),
    })
}

/// WHERE clause and bound values for a filter
fn filter_clause(filter: &PhotoFilter) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(status) = filter.status {
        values.push(Value::Text(status.as_str().to_string()));
        conditions.push(format!("status = ?{}", values.len()));
    }
    if let Some(deleted) = filter.deleted {
        values.push(Value::Integer(i64::from(deleted)));
        conditions.push(format!("deleted = ?{}", values.len()));
    }
    if let Some(tag) = &filter.tag {
        values.push(Value::Text(tag.clone()));
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM photo_tags t WHERE t.photo_id = photos.id AND instr(t.tag, ?{}) > 0)",
            values.len()
        ));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

impl PhotoStore for Library {
    fn create(&self, record: &PhotoRecord) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            &format!(
                "INSERT INTO photos ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                record.id,
                to_millis(&record.uploaded_at),
                record.taken_at.as_ref().map(to_millis),
                record.width,
                record.height,
                record.megapixels,
                record.lat,
                record.long,
                record.cam_serial,
                record.cam_make,
                record.cam_model,
                record.status,
                to_millis(&record.status_updated_at),
                record.deleted,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                return Err(Error::StoreConflict(format!("photo {} already exists", record.id)));
            }
            Err(e) => return Err(e.into()),
        }

        for tag in &record.tags {
            tx.execute(
                "INSERT INTO photo_tags (photo_id, tag) VALUES (?1, ?2)",
                params![record.id, tag],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &ContentId) -> Result<Option<PhotoRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM photos WHERE id = ?1"),
                [id],
                record_from_row,
            )
            .optional()?;

        match record {
            Some(mut record) => {
                record.tags = Self::tags_of(&conn, id)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn exists(&self, id: &ContentId) -> Result<bool> {
        Self::exists_locked(&self.conn(), id)
    }

    fn delete(&self, id: &ContentId) -> Result<bool> {
        let conn = self.conn();
        conn.execute("DELETE FROM photo_tags WHERE photo_id = ?1", [id])?;
        let removed = conn.execute("DELETE FROM photos WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    fn finish(&self, id: &ContentId, status: Status, update: Option<&PhotoUpdate>) -> Result<()> {
        Status::Processing.transition(status)?;

        let conn = self.conn();
        let now = to_millis(&Utc::now());

        let changed = match update {
            Some(u) => conn.execute(
                "UPDATE photos SET status = ?1, status_updated_at = ?2, width = ?3, height = ?4,
                     megapixels = ?5, taken_at = ?6, lat = ?7, long = ?8, cam_serial = ?9,
                     cam_make = ?10, cam_model = ?11
                 WHERE id = ?12 AND status = ?13",
                params![
                    status,
                    now,
                    u.width,
                    u.height,
                    u.megapixels,
                    u.taken_at.as_ref().map(to_millis),
                    u.lat,
                    u.long,
                    u.cam_serial,
                    u.cam_make,
                    u.cam_model,
                    id,
                    Status::Processing,
                ],
            )?,
            None => conn.execute(
                "UPDATE photos SET status = ?1, status_updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![status, now, id, Status::Processing],
            )?,
        };

        if changed == 1 {
            return Ok(());
        }

        // Nothing matched: either the record is gone or it is already terminal
        let current: Option<Status> = conn
            .query_row("SELECT status FROM photos WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        match current {
            Some(from) => Err(Error::InvalidTransition { from, to: status }),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    fn set_deleted(&self, id: &ContentId, deleted: bool) -> Result<()> {
        let changed = self
            .conn()
            .execute("UPDATE photos SET deleted = ?1 WHERE id = ?2", params![deleted, id])?;
        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn add_tag(&self, id: &ContentId, tag: &str) -> Result<()> {
        let conn = self.conn();
        if !Self::exists_locked(&conn, id)? {
            return Err(Error::NotFound(id.to_string()));
        }

        match conn.execute(
            "INSERT INTO photo_tags (photo_id, tag) VALUES (?1, ?2)",
            params![id, tag],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                Err(Error::StoreConflict(format!("tag {tag} already exists")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove_tag(&self, id: &ContentId, tag: &str) -> Result<()> {
        let removed = self.conn().execute(
            "DELETE FROM photo_tags WHERE photo_id = ?1 AND tag = ?2",
            params![id, tag],
        )?;
        if removed == 0 {
            return Err(Error::NotFound(format!("tag {tag}")));
        }
        Ok(())
    }

    fn query(&self, query: &PhotoQuery) -> Result<Vec<PhotoRecord>> {
        let conn = self.conn();
        let (clause, mut values) = filter_clause(&query.filter);

        values.push(Value::Integer(bound(query.limit)?));
        let limit_idx = values.len();
        values.push(Value::Integer(bound(query.start)?));
        let offset_idx = values.len();

        let sql = format!(
            "SELECT {COLUMNS} FROM photos{clause} ORDER BY uploaded_at ASC, id ASC \
             LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut records = stmt
            .query_map(params_from_iter(values.iter()), record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for record in &mut records {
            record.tags = Self::tags_of(&conn, &record.id)?;
        }

        Ok(records)
    }

    fn count(&self, filter: &PhotoFilter) -> Result<usize> {
        let (clause, values) = filter_clause(filter);
        let count: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM photos{clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| Error::InvalidInput("row count out of range"))
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for ContentId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ContentId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        ContentId::parse(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn id(n: u32) -> ContentId {
        ContentId::of(format!("photo-{n}").as_bytes()).unwrap()
    }

    fn seeded(count: u32) -> Library {
        let library = Library::open_in_memory().unwrap();
        let base = Utc::now();
        for n in 0..count {
            let record = PhotoRecord::processing(id(n), base + Duration::seconds(i64::from(n)));
            library.create(&record).unwrap();
        }
        library
    }

    #[test]
    fn test_create_and_get() {
        let library = Library::open_in_memory().unwrap();
        let record = PhotoRecord::processing(id(1), Utc::now());

        library.create(&record).unwrap();

        let stored = library.get(&id(1)).unwrap().unwrap();
        assert_eq!(stored.id, record.id);
        assert_eq!(stored.status, Status::Processing);
        assert_eq!(stored.uploaded_at.timestamp_millis(), record.uploaded_at.timestamp_millis());
        assert!(library.exists(&id(1)).unwrap());
        assert!(library.get(&id(2)).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_create_is_a_conflict() {
        let library = seeded(1);
        let again = PhotoRecord::processing(id(0), Utc::now());

        let err = library.create(&again).unwrap_err();

        assert!(matches!(err, Error::StoreConflict(_)));
    }

    #[test]
    fn test_finish_applies_update_once() {
        let library = seeded(1);
        let update = PhotoUpdate {
            width: 6000,
            height: 4000,
            megapixels: 24.0,
            lat: Some(42.7275),
            long: Some(-73.6825),
            cam_make: Some("Canon".into()),
            ..Default::default()
        };

        library.finish(&id(0), Status::Succeeded, Some(&update)).unwrap();

        let stored = library.get(&id(0)).unwrap().unwrap();
        assert_eq!(stored.status, Status::Succeeded);
        assert_eq!((stored.width, stored.height), (6000, 4000));
        assert_eq!(stored.megapixels, 24.0);
        assert_eq!(stored.cam_make.as_deref(), Some("Canon"));

        // Terminal states are final
        let err = library.finish(&id(0), Status::Failed, None).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition { from: Status::Succeeded, to: Status::Failed }
        ));
        assert!(library.finish(&id(0), Status::Processing, None).is_err());
        assert!(matches!(
            library.finish(&id(9), Status::Failed, None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_tags_reject_duplicates() {
        let library = seeded(1);

        library.add_tag(&id(0), "sunset").unwrap();
        library.add_tag(&id(0), "beach").unwrap();
        let err = library.add_tag(&id(0), "sunset").unwrap_err();
        assert!(matches!(err, Error::StoreConflict(_)));

        let stored = library.get(&id(0)).unwrap().unwrap();
        assert_eq!(stored.tags.iter().collect::<Vec<_>>(), vec!["beach", "sunset"]);

        library.remove_tag(&id(0), "beach").unwrap();
        assert!(matches!(library.remove_tag(&id(0), "beach"), Err(Error::NotFound(_))));
        assert!(matches!(library.add_tag(&id(7), "x"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_query_pages_and_filters() {
        let library = seeded(45);
        for n in 0..40 {
            library.finish(&id(n), Status::Succeeded, None).unwrap();
        }
        library.set_deleted(&id(3), true).unwrap();
        library.add_tag(&id(5), "birthday-party").unwrap();

        let succeeded = PhotoFilter {
            status: Some(Status::Succeeded),
            ..Default::default()
        };
        assert_eq!(library.count(&succeeded).unwrap(), 40);

        let mut seen = Vec::new();
        let mut start = 0;
        loop {
            let page = library
                .query(&PhotoQuery {
                    filter: succeeded.clone(),
                    start,
                    limit: PAGE_SIZE,
                })
                .unwrap();
            seen.extend(page.iter().map(|r| r.id.clone()));
            if page.len() < PAGE_SIZE {
                break;
            }
            start += PAGE_SIZE;
        }
        assert_eq!(seen, (0..40).map(id).collect::<Vec<_>>());

        let not_deleted = PhotoFilter {
            deleted: Some(false),
            ..succeeded.clone()
        };
        assert_eq!(library.count(&not_deleted).unwrap(), 39);

        let tagged = PhotoFilter {
            tag: Some("birthday".into()),
            ..succeeded
        };
        let found = library
            .query(&PhotoQuery {
                filter: tagged,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id(5));
    }

    #[test]
    fn test_delete_removes_record_and_tags() {
        let library = seeded(1);
        library.add_tag(&id(0), "keep").unwrap();

        assert!(library.delete(&id(0)).unwrap());
        assert!(!library.exists(&id(0)).unwrap());
        assert!(!library.delete(&id(0)).unwrap());

        // id can be created again after a hard delete
        library.create(&PhotoRecord::processing(id(0), Utc::now())).unwrap();
        assert!(library.get(&id(0)).unwrap().unwrap().tags.is_empty());
    }

    #[test]
    fn test_oversized_page_bounds_are_rejected() {
        let library = seeded(3);

        for (start, limit) in [(0, usize::MAX), (usize::MAX, 1)] {
            let err = library
                .query(&PhotoQuery {
                    start,
                    limit,
                    ..Default::default()
                })
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "start {start} limit {limit}");
        }

        let all = library
            .query(&PhotoQuery {
                limit: 1_000,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 3);
    }
}
