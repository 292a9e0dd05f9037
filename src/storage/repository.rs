// FILE: src/storage/repository.rs
//! The catalog store: file/tag CRUD over SQLite.
//!
//! Writers (insert, update, delete, tag add/remove, migration) run inside
//! the instance's exclusive section, which is the lock around the writer
//! connection. It is held for the whole transaction so two writers can never
//! both see a tag as missing and race to create it. Readers use the
//! `ReaderPool` and never wait on that section.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value as JsonValue;

use crate::core::{normalize_tag, FileRecord, MAX_STARS};
use crate::error::{CatalogError, Result};
use crate::storage::connection::{open_connection, ReaderPool};
use crate::storage::init::{create_tables, is_empty_database};
use crate::storage::migration::{migrate_to_latest, MigrationReport};
use crate::storage::query::{self, SearchQuery, FILE_COLUMNS};
use crate::storage::version::{
    self, read_metadata, write_metadata, CatalogMetadata, MAJOR_VERSION, RESERVED_KEYS,
};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite caps bound parameters, so tag lookups go out in chunks.
const TAG_FETCH_CHUNK: usize = 500;

/// One record of a batch that could not be written. The rest of the batch
/// was still processed.
#[derive(Debug)]
pub struct BatchFailure {
    /// Position of the record in the submitted slice.
    pub index: usize,
    pub path: String,
    pub error: CatalogError,
}

pub struct Catalog {
    db_path: PathBuf,
    writer: Mutex<Connection>,
    readers: ReaderPool,
    safe_mode: AtomicBool,
    found_major: AtomicI64,
}

impl Catalog {
    /// Open the catalog at `db_path`, creating it if the database is empty.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let mut conn = open_connection(&db_path, busy_timeout)?;

        let meta = if is_empty_database(&conn)? {
            let meta = CatalogMetadata::current();
            let tx = conn.transaction().map_err(CatalogError::Transaction)?;
            create_tables(&tx)?;
            write_metadata(&tx, &meta)?;
            tx.commit().map_err(CatalogError::Transaction)?;
            tracing::info!("[Catalog] Created new catalog {} ({})", meta.version_string(), meta.code_name);
            meta
        } else {
            read_metadata(&conn)?
        };

        let safe_mode = !meta.is_supported_major();
        if safe_mode {
            tracing::warn!(
                "[Catalog] Catalog is version {} but this build supports major {}; entering safe mode",
                meta.version_string(),
                MAJOR_VERSION
            );
        } else if !meta.is_latest() {
            tracing::info!("[Catalog] Catalog version {} can be migrated", meta.version_string());
        }
        if meta.experimental {
            tracing::warn!("[Catalog] Catalog is marked experimental");
        }

        Ok(Self {
            readers: ReaderPool::new(db_path.clone(), busy_timeout),
            db_path,
            writer: Mutex::new(conn),
            safe_mode: AtomicBool::new(safe_mode),
            found_major: AtomicI64::new(meta.major),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// True while the on-disk major version differs from the supported one.
    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.is_safe_mode() {
            return Err(CatalogError::OutdatedSchema {
                found: self.found_major.load(Ordering::Acquire),
                supported: MAJOR_VERSION,
            });
        }
        Ok(())
    }

    /// Enter the exclusive writer section.
    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| CatalogError::State("Poisoned lock".into()))
    }

    // ---------------------------------------------------------------------
    // Files
    // ---------------------------------------------------------------------

    /// Insert a batch of records, assigning their ids.
    ///
    /// A record whose row can't be inserted (duplicate path or hash) is
    /// reported in the returned list and skipped. A failure while resolving
    /// or linking tags rolls back the whole batch and is returned as the
    /// error; per-record failures gathered so far are dropped with it.
    pub fn add_files(&self, records: &mut [FileRecord]) -> Result<Vec<BatchFailure>> {
        self.ensure_usable()?;
        let mut conn = self.writer()?;
        let tx = conn.transaction().map_err(CatalogError::Transaction)?;

        let mut failures = Vec::new();
        let mut assigned = Vec::new();

        for index in 0..records.len() {
            let record = &mut records[index];
            record.id = 0;

            let file_id = match insert_file_row(&tx, record) {
                Ok(id) => id,
                Err(error) => {
                    tracing::debug!("[Catalog] Failed to insert '{}': {}", record.path, error);
                    failures.push(BatchFailure { index, path: record.path.clone(), error });
                    continue;
                }
            };

            let linked = record.tags.iter().try_for_each(|tag| add_file_tag(&tx, file_id, tag));
            if let Err(e) = linked {
                tracing::error!(
                    "[Catalog] Tag failure on '{}', rolling back batch of {}: {}",
                    records[index].path,
                    records.len(),
                    e
                );
                if let Err(rb) = tx.rollback() {
                    tracing::warn!("[Catalog] Rollback failed: {}", rb);
                }
                reset_ids(records, &assigned);
                return Err(e);
            }

            record.id = file_id;
            assigned.push(index);
        }

        if let Err(e) = tx.commit() {
            tracing::error!("[Catalog] Batch commit failed: {}", e);
            reset_ids(records, &assigned);
            return Err(CatalogError::Transaction(e));
        }

        tracing::info!(
            "[Catalog] Added {} of {} files ({} failed)",
            assigned.len(),
            records.len(),
            failures.len()
        );
        Ok(failures)
    }

    /// Write a persisted record's path, stars, last-viewed time, size, hash
    /// and tags back to the catalog in one transaction.
    ///
    /// An unset hash leaves the stored hash untouched.
    pub fn update_file(&self, record: &FileRecord) -> Result<()> {
        self.ensure_usable()?;
        record.ensure_persisted()?;
        let size = size_to_sql(record.size)?;

        let mut conn = self.writer()?;
        let tx = conn.transaction().map_err(CatalogError::Transaction)?;

        let old = fetch_one(&tx, "f.id = ?", SqlValue::Integer(record.id), "file id")?;

        let last_viewed = record.last_viewed.timestamp();
        let result = match &record.hash {
            None => {
                tracing::debug!(
                    "[Catalog] UPDATE file SET path, lastViewed, stars, size WHERE id (args: {:?})",
                    (&record.path, last_viewed, record.stars, size, record.id)
                );
                tx.execute(
                    "UPDATE file SET path = ?1, lastViewed = ?2, stars = ?3, size = ?4 WHERE id = ?5",
                    params![record.path, last_viewed, record.stars, size, record.id],
                )
            }
            Some(hash) => {
                tracing::debug!(
                    "[Catalog] UPDATE file SET path, lastViewed, stars, size, hash WHERE id (args: {:?})",
                    (&record.path, last_viewed, record.stars, size, hash, record.id)
                );
                tx.execute(
                    "UPDATE file SET path = ?1, lastViewed = ?2, stars = ?3, size = ?4, hash = ?5 WHERE id = ?6",
                    params![record.path, last_viewed, record.stars, size, hash, record.id],
                )
            }
        };
        result.map_err(|e| CatalogError::from_statement(e, "failed to update file"))?;

        for tag in record.tags.difference(&old.tags) {
            add_file_tag(&tx, record.id, tag)?;
        }
        for tag in old.tags.difference(&record.tags) {
            remove_file_tag(&tx, record.id, tag)?;
        }

        tx.commit().map_err(CatalogError::Transaction)?;
        tracing::debug!("[Catalog] Updated file {}", record);
        Ok(())
    }

    /// Delete a record and its tag memberships, then clear its id.
    pub fn remove_file(&self, record: &mut FileRecord) -> Result<()> {
        self.ensure_usable()?;
        record.ensure_persisted()?;

        let mut conn = self.writer()?;
        let tx = conn.transaction().map_err(CatalogError::Transaction)?;

        tracing::debug!("[Catalog] DELETE FROM tag WHERE fileId = {}", record.id);
        tx.execute("DELETE FROM tag WHERE fileId = ?1", params![record.id])?;
        tracing::debug!("[Catalog] DELETE FROM file WHERE id = {}", record.id);
        let removed = tx.execute("DELETE FROM file WHERE id = ?1", params![record.id])?;
        if removed == 0 {
            return Err(CatalogError::NotFound(format!("file id {}", record.id)));
        }

        tx.commit().map_err(CatalogError::Transaction)?;
        tracing::info!("[Catalog] Removed {}", record.path);
        record.id = 0;
        Ok(())
    }

    pub fn get_file_by_id(&self, id: i64) -> Result<FileRecord> {
        self.ensure_usable()?;
        self.readers
            .with_reader(|conn| fetch_one(conn, "f.id = ?", SqlValue::Integer(id), "file id"))
    }

    pub fn get_file_by_path(&self, path: &str) -> Result<FileRecord> {
        self.ensure_usable()?;
        self.readers
            .with_reader(|conn| fetch_one(conn, "f.path = ?", SqlValue::Text(path.to_string()), "file path"))
    }

    /// Run a search. See `SearchQuery` for the filter semantics.
    pub fn search_files(&self, search: &SearchQuery) -> Result<Vec<FileRecord>> {
        self.ensure_usable()?;
        let compiled = query::compile(search)?;
        let files = self
            .readers
            .with_reader(|conn| load_files(conn, &compiled.sql, &compiled.args))?;
        tracing::debug!("[Catalog] Search returned {} files", files.len());
        Ok(files)
    }

    pub fn file_count(&self) -> Result<u64> {
        self.ensure_usable()?;
        self.readers.with_reader(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM file", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
    }

    /// Persist computed fingerprints for already persisted records.
    ///
    /// Only fields that are set are written. A record that can't be written
    /// (unpersisted, or its hash already belongs to another file) is
    /// reported and skipped. A hash conflict still stores the record's size.
    pub fn apply_fingerprints(&self, records: &[FileRecord]) -> Result<Vec<BatchFailure>> {
        self.ensure_usable()?;
        let mut conn = self.writer()?;
        let tx = conn.transaction().map_err(CatalogError::Transaction)?;
        let mut failures = Vec::new();
        let mut written = 0usize;

        for (index, record) in records.iter().enumerate() {
            if record.hash.is_none() && record.size.is_none() {
                continue;
            }
            let outcome = record.ensure_persisted().and_then(|_| {
                let size = size_to_sql(record.size)?;
                tracing::debug!(
                    "[Catalog] UPDATE file SET hash, size WHERE id (args: {:?})",
                    (&record.hash, size, record.id)
                );
                tx.execute(
                    "UPDATE file SET hash = COALESCE(?1, hash), size = COALESCE(?2, size) WHERE id = ?3",
                    params![record.hash, size, record.id],
                )
                .map_err(|e| CatalogError::from_statement(e, "failed to store fingerprint"))
            });
            match outcome {
                Ok(0) => failures.push(BatchFailure {
                    index,
                    path: record.path.clone(),
                    error: CatalogError::NotFound(format!("file id {}", record.id)),
                }),
                Ok(_) => written += 1,
                Err(error @ CatalogError::Conflict(_)) => {
                    // The hash belongs to another file; the size is still good.
                    if let Some(size) = size_to_sql(record.size)? {
                        tracing::debug!("[Catalog] UPDATE file SET size WHERE id (args: {:?})", (size, record.id));
                        tx.execute("UPDATE file SET size = ?1 WHERE id = ?2", params![size, record.id])?;
                    }
                    failures.push(BatchFailure { index, path: record.path.clone(), error });
                }
                Err(error) => failures.push(BatchFailure { index, path: record.path.clone(), error }),
            }
        }

        tx.commit().map_err(CatalogError::Transaction)?;
        tracing::info!("[Catalog] Stored fingerprints for {} files ({} failed)", written, failures.len());
        Ok(failures)
    }

    // ---------------------------------------------------------------------
    // Tags
    // ---------------------------------------------------------------------

    /// Create a tag name. A tag that already exists is a `Conflict`.
    pub fn add_tag(&self, tag: &str) -> Result<i64> {
        self.ensure_usable()?;
        let tag = normalize_tag(tag).ok_or_else(|| CatalogError::Validation("cannot use empty tag".into()))?;

        let mut conn = self.writer()?;
        let tx = conn.transaction().map_err(CatalogError::Transaction)?;
        tracing::debug!("[Catalog] INSERT INTO tag_name(value) VALUES ({:?})", tag);
        tx.execute("INSERT INTO tag_name(value) VALUES (?1)", params![tag])
            .map_err(|e| CatalogError::from_statement(e, &format!("tag '{}' already exists", tag)))?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(CatalogError::Transaction)?;
        Ok(id)
    }

    /// Delete a tag name and every membership that references it.
    pub fn remove_tag(&self, tag: &str) -> Result<()> {
        self.ensure_usable()?;
        let tag = normalize_tag(tag).ok_or_else(|| CatalogError::Validation("cannot use empty tag".into()))?;

        let mut conn = self.writer()?;
        let tx = conn.transaction().map_err(CatalogError::Transaction)?;
        let id = lookup_tag_id(&tx, &tag)?.ok_or_else(|| CatalogError::NotFound(format!("tag '{}'", tag)))?;

        tracing::debug!("[Catalog] DELETE FROM tag WHERE tagNameId = {}", id);
        let unlinked = tx.execute("DELETE FROM tag WHERE tagNameId = ?1", params![id])?;
        tracing::debug!("[Catalog] DELETE FROM tag_name WHERE id = {}", id);
        tx.execute("DELETE FROM tag_name WHERE id = ?1", params![id])?;
        tx.commit().map_err(CatalogError::Transaction)?;

        tracing::info!("[Catalog] Removed tag '{}' from {} files", tag, unlinked);
        Ok(())
    }

    pub fn has_tag(&self, tag: &str) -> Result<bool> {
        self.ensure_usable()?;
        let Some(tag) = normalize_tag(tag) else {
            return Ok(false);
        };
        self.readers.with_reader(|conn| Ok(lookup_tag_id(conn, &tag)?.is_some()))
    }

    /// Every tag name keyed by its id.
    pub fn all_tags(&self) -> Result<BTreeMap<i64, String>> {
        self.ensure_usable()?;
        self.readers.with_reader(all_tag_names)
    }

    // ---------------------------------------------------------------------
    // Metadata & migration
    // ---------------------------------------------------------------------

    /// Read the persisted metadata. Available in safe mode.
    pub fn metadata(&self) -> Result<CatalogMetadata> {
        self.readers.with_reader(read_metadata)
    }

    /// Store an extension key in the metadata record.
    pub fn set_metadata_value(&self, key: &str, value: JsonValue) -> Result<()> {
        self.ensure_usable()?;
        if RESERVED_KEYS.contains(&key) {
            return Err(CatalogError::Validation(format!("'{}' is managed by the catalog", key)));
        }
        let conn = self.writer()?;
        tracing::debug!("[Catalog] INSERT OR REPLACE INTO db_info ({:?}, {:?})", key, value);
        conn.execute(
            "INSERT OR REPLACE INTO db_info(key, value) VALUES (?1, ?2)",
            params![key, version::json_to_sql(&value)],
        )?;
        Ok(())
    }

    /// Bring the catalog up to the latest supported version.
    ///
    /// Safe mode is re-evaluated afterwards from the stored metadata.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let mut conn = self.writer()?;
        let report = migrate_to_latest(&mut conn)?;

        let meta = read_metadata(&conn)?;
        self.found_major.store(meta.major, Ordering::Release);
        self.safe_mode.store(!meta.is_supported_major(), Ordering::Release);
        Ok(report)
    }
}

fn reset_ids(records: &mut [FileRecord], assigned: &[usize]) {
    for &i in assigned {
        records[i].id = 0;
    }
}

fn size_to_sql(size: Option<u64>) -> Result<Option<i64>> {
    size.map(|s| i64::try_from(s).map_err(|_| CatalogError::Validation(format!("size {} is too large", s))))
        .transpose()
}

fn insert_file_row(conn: &Connection, record: &FileRecord) -> Result<i64> {
    let size = size_to_sql(record.size)?;
    let last_viewed = record.last_viewed.timestamp();
    tracing::debug!(
        "[Catalog] INSERT INTO file(path, lastViewed, stars, size, hash) (args: {:?})",
        (&record.path, last_viewed, record.stars, size, &record.hash)
    );
    conn.execute(
        "INSERT INTO file(path, lastViewed, stars, size, hash) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![record.path, last_viewed, record.stars, size, record.hash],
    )
    .map_err(|e| CatalogError::from_statement(e, &format!("failed to insert file '{}'", record.path)))?;
    Ok(conn.last_insert_rowid())
}

/// Get a tag's id by its normalized value
fn lookup_tag_id(conn: &Connection, tag: &str) -> Result<Option<i64>> {
    let result = conn.query_row("SELECT id FROM tag_name WHERE value = ?1", params![tag], |r| r.get(0));
    match result {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(CatalogError::Database(e)),
    }
}

/// Link a file to a tag, creating the tag name if needed.
fn add_file_tag(conn: &Connection, file_id: i64, tag: &str) -> Result<()> {
    let tag_id = match lookup_tag_id(conn, tag)? {
        Some(id) => id,
        None => {
            tracing::debug!("[Catalog] INSERT INTO tag_name(value) VALUES ({:?})", tag);
            conn.execute("INSERT INTO tag_name(value) VALUES (?1)", params![tag])
                .map_err(|e| CatalogError::from_statement(e, &format!("failed to create tag '{}'", tag)))?;
            conn.last_insert_rowid()
        }
    };
    tracing::debug!("[Catalog] INSERT INTO tag(fileId, tagNameId) VALUES ({}, {})", file_id, tag_id);
    conn.execute(
        "INSERT INTO tag(fileId, tagNameId) VALUES (?1, ?2)",
        params![file_id, tag_id],
    )
    .map_err(|e| CatalogError::from_statement(e, &format!("failed to tag file {} with '{}'", file_id, tag)))?;
    Ok(())
}

/// Unlink a file from a tag. A tag name that doesn't exist is a no-op.
fn remove_file_tag(conn: &Connection, file_id: i64, tag: &str) -> Result<()> {
    let Some(tag_id) = lookup_tag_id(conn, tag)? else {
        return Ok(());
    };
    tracing::debug!("[Catalog] DELETE FROM tag WHERE fileId = {} AND tagNameId = {}", file_id, tag_id);
    conn.execute(
        "DELETE FROM tag WHERE fileId = ?1 AND tagNameId = ?2",
        params![file_id, tag_id],
    )?;
    Ok(())
}

fn all_tag_names(conn: &Connection) -> Result<BTreeMap<i64, String>> {
    let mut stmt = conn.prepare("SELECT id, value FROM tag_name")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    let mut tags = BTreeMap::new();
    for r in rows {
        let (id, value) = r?;
        tags.insert(id, value);
    }
    Ok(tags)
}

/// Lookup that must match exactly one row.
fn fetch_one(conn: &Connection, predicate: &str, arg: SqlValue, what: &str) -> Result<FileRecord> {
    let sql = format!("SELECT {} FROM file f WHERE {}", FILE_COLUMNS, predicate);
    let mut files = load_files(conn, &sql, std::slice::from_ref(&arg))?;
    match files.len() {
        0 => Err(CatalogError::NotFound(format!("{} {:?}", what, arg))),
        1 => Ok(files.remove(0)),
        n => {
            tracing::error!("[Catalog] {} {:?} matched {} files", what, arg, n);
            Err(CatalogError::ConsistencyViolation(format!(
                "expected exactly one file for {} {:?}, found {}",
                what, arg, n
            )))
        }
    }
}

type FileRow = (i64, String, i64, Option<i64>, Option<i64>, Option<String>);

fn record_from_row(row: FileRow) -> Result<FileRecord> {
    let (id, path, last_viewed, stars, size, hash) = row;
    let last_viewed = DateTime::<Utc>::from_timestamp(last_viewed, 0).ok_or_else(|| {
        CatalogError::ConsistencyViolation(format!("file {} has invalid lastViewed {}", id, last_viewed))
    })?;
    let stars = match stars.unwrap_or(0) {
        s @ 0..=5 => s as u8,
        s => {
            return Err(CatalogError::ConsistencyViolation(format!(
                "file {} has {} stars (max {})",
                id, s, MAX_STARS
            )))
        }
    };
    let size = size
        .map(|s| {
            u64::try_from(s)
                .map_err(|_| CatalogError::ConsistencyViolation(format!("file {} has negative size {}", id, s)))
        })
        .transpose()?;

    Ok(FileRecord {
        id,
        path,
        tags: BTreeSet::new(),
        last_viewed,
        stars,
        size,
        hash,
    })
}

/// Run a file query (selecting `FILE_COLUMNS`) and attach each file's tags.
pub(crate) fn load_files(conn: &Connection, sql: &str, args: &[SqlValue]) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
    })?;

    let mut files = Vec::new();
    for r in rows {
        files.push(record_from_row(r?)?);
    }
    attach_tags(conn, &mut files)?;
    Ok(files)
}

/// Fill in the tag sets for a list of files with a few bulk queries.
fn attach_tags(conn: &Connection, files: &mut [FileRecord]) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    let positions: HashMap<i64, usize> = files.iter().enumerate().map(|(i, f)| (f.id, i)).collect();
    let ids: Vec<i64> = files.iter().map(|f| f.id).collect();

    for chunk in ids.chunks(TAG_FETCH_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT t.fileId, t.tagNameId, n.value FROM tag t LEFT JOIN tag_name n ON t.tagNameId = n.id WHERE t.fileId IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, Option<String>>(2)?))
        })?;

        for r in rows {
            let (file_id, tag_id, value) = r?;
            let Some(value) = value else {
                tracing::error!("[Catalog] File {} references missing tag name {}", file_id, tag_id);
                return Err(CatalogError::ConsistencyViolation(format!(
                    "file {} references tag name {} which doesn't exist",
                    file_id, tag_id
                )));
            };
            if let Some(&i) = positions.get(&file_id) {
                files[i].tags.insert(value);
            }
        }
    }
    Ok(())
}
