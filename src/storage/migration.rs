//! Staged schema migration
//!
//! Only the supported major version has runnable steps. Steps run in minor
//! order, each in its own transaction that also records the new minor, so an
//! interrupted migration leaves the catalog at a real intermediate version.
//! Older majors are refused: there is no automated path off them.

use rusqlite::Connection;

use crate::error::{CatalogError, Result};
use crate::storage::init::{create_db_info_table, TAG_LOOKUP_INDEX};
use crate::storage::version::{
    code_name, format_version, read_metadata, set_version_key, write_metadata, CatalogMetadata,
    MetadataLayout, KEY_MINOR, KEY_REVISION, MAJOR_VERSION, MINOR_VERSION, REVISION,
};

/// Outcome of a migration request, with a readable account of each step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: String,
    pub to: String,
    pub log: Vec<String>,
}

struct MigrationStep {
    major: i64,
    from_minor: i64,
    to_minor: i64,
    description: &'static str,
    run: fn(&Connection) -> Result<()>,
}

/// Ordered by (major, from_minor).
const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        major: 3,
        from_minor: 0,
        to_minor: 1,
        description: "store metadata as key/value rows",
        run: rewrite_positional_db_info,
    },
    MigrationStep {
        major: 3,
        from_minor: 1,
        to_minor: 2,
        description: "index tag memberships by tag",
        run: add_tag_lookup_index,
    },
];

/// 3.0 kept one positional row (major, minor, revision) in `db_info`.
fn rewrite_positional_db_info(conn: &Connection) -> Result<()> {
    let meta = read_metadata(conn)?;
    if meta.layout != MetadataLayout::Positional {
        return Ok(());
    }
    conn.execute_batch("DROP TABLE db_info;")?;
    create_db_info_table(conn)?;
    write_metadata(conn, &CatalogMetadata::at(meta.major, meta.minor, meta.revision, MetadataLayout::KeyValue))?;
    Ok(())
}

fn add_tag_lookup_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(TAG_LOOKUP_INDEX)?;
    Ok(())
}

/// Migrate the catalog behind `conn` to the latest supported version.
///
/// Callers must hold the catalog's writer section.
pub fn migrate_to_latest(conn: &mut Connection) -> Result<MigrationReport> {
    let meta = read_metadata(conn)?;
    let from = meta.version_string();
    let to = format_version(MAJOR_VERSION, MINOR_VERSION, REVISION);
    let mut log = vec![format!("Catalog is version {} ({})", from, meta.code_name)];

    if meta.is_latest() {
        log.push("Already up to date".to_string());
        return Ok(MigrationReport { from, to, log });
    }

    match meta.major {
        1 | 2 => {
            return Err(CatalogError::Migration(format!(
                "version {} ({}) catalogs cannot be migrated",
                meta.major,
                code_name(meta.major)
            )))
        }
        MAJOR_VERSION => {}
        other => return Err(CatalogError::Migration(format!("unsupported major version {}", other))),
    }
    if meta.minor > MINOR_VERSION || meta.minor < 0 {
        return Err(CatalogError::Migration(format!(
            "unsupported version {}, max version is {}",
            from, to
        )));
    }

    let mut minor = meta.minor;
    for step in MIGRATIONS.iter().filter(|s| s.major == MAJOR_VERSION) {
        if step.from_minor != minor {
            continue;
        }
        tracing::info!(
            "[Migration] {}.{} -> {}.{}: {}",
            step.major,
            step.from_minor,
            step.major,
            step.to_minor,
            step.description
        );

        let tx = conn.transaction().map_err(CatalogError::Transaction)?;
        (step.run)(&tx).map_err(|e| {
            tracing::error!("[Migration] Step to {}.{} failed: {}", step.major, step.to_minor, e);
            e
        })?;
        set_version_key(&tx, KEY_MINOR, step.to_minor)?;
        tx.commit().map_err(CatalogError::Transaction)?;

        log.push(format!(
            "Migrated {}.{} -> {}.{}: {}",
            step.major, step.from_minor, step.major, step.to_minor, step.description
        ));
        minor = step.to_minor;
    }

    if minor != MINOR_VERSION {
        return Err(CatalogError::Migration(format!(
            "no migration path from {}.{} to {}.{}",
            MAJOR_VERSION, minor, MAJOR_VERSION, MINOR_VERSION
        )));
    }

    set_version_key(conn, KEY_REVISION, REVISION)?;
    log.push(format!("Catalog is now version {}", to));
    tracing::info!("[Migration] Migrated catalog {} -> {}", from, to);

    Ok(MigrationReport { from, to, log })
}
