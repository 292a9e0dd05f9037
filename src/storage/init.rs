//! Catalog schema creation
//!
//! Four tables make up a catalog:
//! - `file`: one row per media file
//! - `tag_name`: each distinct tag string, stored once
//! - `tag`: file <-> tag_name membership pairs
//! - `db_info`: key/value metadata (versions, code name, extensions)

use rusqlite::Connection;

use crate::error::Result;

/// Lookup index on tag membership by tag, introduced with minor version 2.
pub(crate) const TAG_LOOKUP_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tag_tag_name ON tag(tagNameId);";

/// True if the database holds no tables at all (freshly created file).
pub fn is_empty_database(conn: &Connection) -> Result<bool> {
    let tables: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(tables == 0)
}

/// True if a table with this name exists.
pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Create all catalog tables at the current schema version.
///
/// Callers run this inside a transaction together with the initial metadata.
pub fn create_tables(conn: &Connection) -> Result<()> {
    create_db_info_table(conn)?;
    create_file_table(conn)?;
    create_tag_name_table(conn)?;
    create_tag_table(conn)?;
    Ok(())
}

pub(crate) fn create_db_info_table(conn: &Connection) -> Result<()> {
    // `value` is left untyped so each row keeps whatever type was written.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS db_info (
            key TEXT UNIQUE NOT NULL,
            value
        );
    "#,
    )?;
    tracing::debug!("Created db_info table");
    Ok(())
}

fn create_file_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS file (
            id INTEGER PRIMARY KEY AUTOINCREMENT UNIQUE NOT NULL,
            path TEXT NOT NULL UNIQUE,
            lastViewed INTEGER NOT NULL,
            stars INTEGER,
            size INTEGER,
            hash TEXT UNIQUE,
            CHECK(hash IS NULL OR length(hash) == 64),
            CHECK(stars >= 0 AND stars <= 5)
        );
    "#,
    )?;
    tracing::debug!("Created file table");
    Ok(())
}

fn create_tag_name_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tag_name (
            id INTEGER PRIMARY KEY UNIQUE NOT NULL,
            value TEXT NOT NULL UNIQUE
        );
    "#,
    )?;
    tracing::debug!("Created tag_name table");
    Ok(())
}

fn create_tag_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tag (
            fileId INTEGER NOT NULL,
            tagNameId INTEGER NOT NULL,
            FOREIGN KEY (fileId) REFERENCES file(id),
            FOREIGN KEY (tagNameId) REFERENCES tag_name(id),
            UNIQUE(fileId, tagNameId)
        );
    "#,
    )?;
    conn.execute_batch(TAG_LOOKUP_INDEX)?;
    tracing::debug!("Created tag table");
    Ok(())
}
