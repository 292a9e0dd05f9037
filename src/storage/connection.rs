//! Database connection management
//!
//! Opens SQLite connections with the catalog's pragmas and the `regexp`
//! scalar function, and hands out reader connections so lookups and searches
//! never queue behind the writer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use crate::error::{CatalogError, Result};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Idle reader connections kept around for reuse.
const MAX_IDLE_READERS: usize = 4;

/// Open the writer connection for the catalog at `db_path`.
///
/// Creates the parent directory if needed, switches the database to WAL so
/// readers don't block on the writer, and enables foreign keys.
pub fn open_connection(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(dir) = db_path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(CatalogError::Io)?;
        }
    }

    let conn = Connection::open(db_path).map_err(CatalogError::Database)?;

    // Enable WAL mode for better concurrent access
    conn.pragma_update(None, "journal_mode", WAL)?;

    configure(&conn, busy_timeout)?;

    tracing::info!("[Connection] Opened catalog database at: {}", db_path.display());
    Ok(conn)
}

/// Settings every connection needs, writer or reader.
fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", ON)?;
    conn.pragma_update(None, "synchronous", NORMAL)?;
    conn.busy_timeout(busy_timeout)?;
    register_regexp(conn)?;
    Ok(())
}

/// Register `regexp(pattern, text)` so `text REGEXP pattern` works in SQL.
///
/// The compiled pattern is cached per statement as auxiliary data.
pub fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let re: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> std::result::Result<_, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;
            let text = ctx
                .get_raw(1)
                .as_str()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            Ok(re.is_match(text))
        },
    )?;
    Ok(())
}

/// Reader connections shared by read-only operations.
///
/// Readers are opened lazily against the same file and returned after each
/// use. They never touch the writer's exclusive section.
pub struct ReaderPool {
    db_path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    pub fn new(db_path: PathBuf, busy_timeout: Duration) -> Self {
        Self {
            db_path,
            busy_timeout,
            idle: Mutex::new(Vec::new()),
        }
    }

    fn checkout(&self) -> Result<Connection> {
        let cached = self
            .idle
            .lock()
            .map_err(|_| CatalogError::State("Poisoned lock".into()))?
            .pop();
        match cached {
            Some(conn) => Ok(conn),
            None => {
                let conn = Connection::open(&self.db_path)?;
                configure(&conn, self.busy_timeout)?;
                tracing::debug!("[Connection] Opened reader for {}", self.db_path.display());
                Ok(conn)
            }
        }
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_READERS {
                idle.push(conn);
            }
        }
    }

    /// Run `f` against a reader connection.
    pub fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.checkout()?;
        let result = f(&conn);
        self.checkin(conn);
        result
    }
}

// SQL pragma constants
const WAL: &str = "WAL";
const ON: &str = "ON";
const NORMAL: &str = "NORMAL";
