//! Schema versions and the `db_info` metadata record
//!
//! Version numbers follow three levels:
//! - major: breaking structural change, must be migrated (or refused)
//! - minor: compatible structural/behavioral change
//! - revision: code-only fix, no structural impact

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection};
use serde_json::Value as JsonValue;

use crate::error::{CatalogError, Result};
use crate::storage::init::table_exists;

pub const MAJOR_VERSION: i64 = 3;
pub const MINOR_VERSION: i64 = 2;
pub const REVISION: i64 = 1;

pub const KEY_MAJOR: &str = "majorVersion";
pub const KEY_MINOR: &str = "minorVersion";
pub const KEY_REVISION: &str = "revision";
pub const KEY_VERSION_NAME: &str = "versionName";
pub const KEY_EXPERIMENTAL: &str = "experimental";

/// Keys owned by the version manager; extensions may not overwrite them.
pub const RESERVED_KEYS: &[&str] = &[KEY_MAJOR, KEY_MINOR, KEY_REVISION, KEY_VERSION_NAME, KEY_EXPERIMENTAL];

pub fn code_name(major: i64) -> String {
    match major {
        1 => "EraseMe".to_string(),
        2 => "InTheHouseOfLeaves".to_string(),
        3 => "EcstacyInGrief".to_string(),
        4 => "WestCoast".to_string(),
        other => format!("<Unsupported version '{}'>", other),
    }
}

pub fn format_version(major: i64, minor: i64, revision: i64) -> String {
    format!("{}.{}r{}", major, minor, revision)
}

/// Where a metadata record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataLayout {
    /// Current `db_info(key, value)` rows.
    KeyValue,
    /// Early 3.0 `db_info` with one positional row of major/minor/revision.
    Positional,
    /// No `db_info` at all; version inferred from the `file` table shape.
    Inferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogMetadata {
    pub major: i64,
    pub minor: i64,
    pub revision: i64,
    pub code_name: String,
    pub experimental: bool,
    /// Every non-reserved `db_info` key.
    pub extensions: BTreeMap<String, JsonValue>,
    pub layout: MetadataLayout,
}

impl CatalogMetadata {
    /// Metadata for a catalog created by this build.
    pub fn current() -> Self {
        Self::at(MAJOR_VERSION, MINOR_VERSION, REVISION, MetadataLayout::KeyValue)
    }

    pub(crate) fn at(major: i64, minor: i64, revision: i64, layout: MetadataLayout) -> Self {
        Self {
            major,
            minor,
            revision,
            code_name: code_name(major),
            experimental: false,
            extensions: BTreeMap::new(),
            layout,
        }
    }

    pub fn version_string(&self) -> String {
        format_version(self.major, self.minor, self.revision)
    }

    /// True if the catalog's structure can be used by this build.
    pub fn is_supported_major(&self) -> bool {
        self.major == MAJOR_VERSION
    }

    pub fn is_latest(&self) -> bool {
        self.major == MAJOR_VERSION && self.minor == MINOR_VERSION && self.revision == REVISION
    }
}

/// Read the catalog's metadata, falling back to structural probes for
/// catalogs that predate `db_info`.
pub fn read_metadata(conn: &Connection) -> Result<CatalogMetadata> {
    if !table_exists(conn, "db_info")? {
        return infer_legacy_version(conn);
    }

    let has_key_column: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('db_info') WHERE name = 'key'",
        [],
        |row| row.get(0),
    )?;
    if has_key_column == 0 {
        return read_positional(conn);
    }

    let mut stmt = conn.prepare("SELECT key, value FROM db_info")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, SqlValue>(1)?)))?;

    let mut major = None;
    let mut minor = None;
    let mut revision = None;
    let mut name = None;
    let mut experimental = false;
    let mut extensions = BTreeMap::new();

    for row in rows {
        let (key, value) = row?;
        match key.as_str() {
            KEY_MAJOR => major = Some(expect_integer(&key, &value)?),
            KEY_MINOR => minor = Some(expect_integer(&key, &value)?),
            KEY_REVISION => revision = Some(expect_integer(&key, &value)?),
            KEY_VERSION_NAME => match value {
                SqlValue::Text(s) => name = Some(s),
                other => {
                    return Err(CatalogError::ConsistencyViolation(format!(
                        "db_info '{}' is not text: {:?}",
                        key, other
                    )))
                }
            },
            KEY_EXPERIMENTAL => experimental = expect_integer(&key, &value)? > 0,
            _ => {
                extensions.insert(key, sql_to_json(value));
            }
        }
    }

    let missing = |field: &str| CatalogError::ConsistencyViolation(format!("db_info is missing required field '{}'", field));
    Ok(CatalogMetadata {
        major: major.ok_or_else(|| missing(KEY_MAJOR))?,
        minor: minor.ok_or_else(|| missing(KEY_MINOR))?,
        revision: revision.ok_or_else(|| missing(KEY_REVISION))?,
        code_name: name.ok_or_else(|| missing(KEY_VERSION_NAME))?,
        experimental,
        extensions,
        layout: MetadataLayout::KeyValue,
    })
}

/// Oldest layouts had no metadata. Version 2 introduced the `hash` column
/// (sometimes spelled in capitals), version 1 had none.
fn infer_legacy_version(conn: &Connection) -> Result<CatalogMetadata> {
    let hash_columns: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('file') WHERE lower(name) = 'hash'",
        [],
        |row| row.get(0),
    )?;
    let major = if hash_columns > 0 { 2 } else { 1 };
    tracing::info!("[Version] No db_info table, inferred legacy major version {}", major);
    Ok(CatalogMetadata::at(major, 0, 0, MetadataLayout::Inferred))
}

fn read_positional(conn: &Connection) -> Result<CatalogMetadata> {
    let row = conn.query_row("SELECT * FROM db_info LIMIT 1", [], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
    });
    match row {
        Ok((major, minor, revision)) => Ok(CatalogMetadata::at(major, minor, revision, MetadataLayout::Positional)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(CatalogError::ConsistencyViolation(
            "positional db_info table holds no version row".into(),
        )),
        Err(e) => Err(CatalogError::ConsistencyViolation(format!(
            "positional db_info table is unreadable: {}",
            e
        ))),
    }
}

fn expect_integer(key: &str, value: &SqlValue) -> Result<i64> {
    match value {
        SqlValue::Integer(i) => Ok(*i),
        other => Err(CatalogError::ConsistencyViolation(format!(
            "db_info '{}' is not an integer: {:?}",
            key, other
        ))),
    }
}

/// Write a complete key/value metadata record.
pub fn write_metadata(conn: &Connection, meta: &CatalogMetadata) -> Result<()> {
    let mut stmt = conn.prepare("INSERT OR REPLACE INTO db_info(key, value) VALUES (?1, ?2)")?;
    stmt.execute(params![KEY_MAJOR, meta.major])?;
    stmt.execute(params![KEY_MINOR, meta.minor])?;
    stmt.execute(params![KEY_REVISION, meta.revision])?;
    stmt.execute(params![KEY_VERSION_NAME, meta.code_name])?;
    stmt.execute(params![KEY_EXPERIMENTAL, meta.experimental as i64])?;
    for (key, value) in &meta.extensions {
        stmt.execute(params![key, json_to_sql(value)])?;
    }
    tracing::debug!("[Version] Wrote metadata {}", meta.version_string());
    Ok(())
}

/// Overwrite one integer version key.
pub fn set_version_key(conn: &Connection, key: &str, value: i64) -> Result<()> {
    let changed = conn.execute("UPDATE db_info SET value = ?1 WHERE key = ?2", params![value, key])?;
    if changed == 0 {
        conn.execute("INSERT INTO db_info(key, value) VALUES (?1, ?2)", params![key, value])?;
    }
    Ok(())
}

pub(crate) fn sql_to_json(value: SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Integer(i) => JsonValue::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
        SqlValue::Text(s) => JsonValue::String(s),
        SqlValue::Blob(b) => JsonValue::String(hex::encode(b)),
    }
}

pub(crate) fn json_to_sql(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Integer(*b as i64),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
