use std::path::Path;

use mediacat::storage::MetadataLayout;
use mediacat::{Catalog, CatalogError, FileRecord, SearchQuery};
use rusqlite::Connection;

const V3_TABLES: &str = "
    CREATE TABLE file (
        id INTEGER PRIMARY KEY AUTOINCREMENT UNIQUE NOT NULL,
        path TEXT NOT NULL UNIQUE,
        lastViewed INTEGER NOT NULL,
        stars INTEGER,
        size INTEGER,
        hash TEXT UNIQUE
    );
    CREATE TABLE tag_name (id INTEGER PRIMARY KEY UNIQUE NOT NULL, value TEXT NOT NULL UNIQUE);
    CREATE TABLE tag (
        fileId INTEGER NOT NULL REFERENCES file(id),
        tagNameId INTEGER NOT NULL REFERENCES tag_name(id),
        UNIQUE(fileId, tagNameId)
    );";

fn seed(path: &Path, sql: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(sql).unwrap();
}

fn assert_outdated<T: std::fmt::Debug>(result: mediacat::Result<T>, major: i64) {
    match result {
        Err(CatalogError::OutdatedSchema { found, supported }) => {
            assert_eq!(found, major);
            assert_eq!(supported, 3);
        }
        other => panic!("expected outdated schema, got {:?}", other),
    }
}

fn assert_every_operation_refused(catalog: &Catalog, major: i64) {
    let mut record = FileRecord::new("/m/a.png");
    assert_outdated(catalog.add_files(std::slice::from_mut(&mut record)), major);
    assert_outdated(catalog.update_file(&record), major);
    assert_outdated(catalog.remove_file(&mut record), major);
    assert_outdated(catalog.get_file_by_id(1), major);
    assert_outdated(catalog.get_file_by_path("/m/a.png"), major);
    assert_outdated(catalog.search_files(&SearchQuery::default()), major);
    assert_outdated(catalog.add_tag("x"), major);
    assert_outdated(catalog.remove_tag("x"), major);
    assert_outdated(catalog.has_tag("x"), major);
    assert_outdated(catalog.all_tags(), major);
    assert_outdated(catalog.file_count(), major);
}

#[test]
fn new_catalog_is_current() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
    assert!(!catalog.is_safe_mode());
    let meta = catalog.metadata().unwrap();
    assert_eq!(meta.version_string(), "3.2r1");
    assert_eq!(meta.code_name, "EcstacyInGrief");

    let report = catalog.migrate().unwrap();
    assert_eq!(report.log.last().map(String::as_str), Some("Already up to date"));
}

#[test]
fn legacy_v2_catalog_enters_safe_mode() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("catalog.db");
    seed(&db, "CREATE TABLE file (id INTEGER PRIMARY KEY, path TEXT, Hash TEXT);");

    let catalog = Catalog::open(&db).unwrap();
    assert!(catalog.is_safe_mode());
    assert_eq!(catalog.metadata().unwrap().code_name, "InTheHouseOfLeaves");
    assert_every_operation_refused(&catalog, 2);

    match catalog.migrate() {
        Err(CatalogError::Migration(msg)) => assert!(msg.contains("cannot be migrated")),
        other => panic!("expected migration refusal, got {:?}", other),
    }
    assert!(catalog.is_safe_mode());
}

#[test]
fn newer_major_enters_safe_mode() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("catalog.db");
    seed(
        &db,
        &format!(
            "{}
            CREATE TABLE db_info (key TEXT UNIQUE NOT NULL, value);
            INSERT INTO db_info VALUES ('majorVersion', 4), ('minorVersion', 0), ('revision', 0),
                ('versionName', 'WestCoast'), ('experimental', 0);",
            V3_TABLES
        ),
    );

    let catalog = Catalog::open(&db).unwrap();
    assert!(catalog.is_safe_mode());
    assert_every_operation_refused(&catalog, 4);
    assert!(matches!(catalog.migrate(), Err(CatalogError::Migration(_))));
}

#[test]
fn positional_v3_0_migrates_to_latest() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("catalog.db");
    seed(
        &db,
        &format!(
            "{}
            CREATE TABLE db_info (major INTEGER, minor INTEGER, revision INTEGER);
            INSERT INTO db_info VALUES (3, 0, 0);
            INSERT INTO file (path, lastViewed, stars) VALUES ('/m/old.png', 0, 3);",
            V3_TABLES
        ),
    );

    let catalog = Catalog::open(&db).unwrap();
    assert!(!catalog.is_safe_mode());
    assert_eq!(catalog.metadata().unwrap().layout, MetadataLayout::Positional);

    let report = catalog.migrate().unwrap();
    assert_eq!(report.from, "3.0r0");
    assert_eq!(report.to, "3.2r1");
    assert!(report.log.len() >= 3);

    let meta = catalog.metadata().unwrap();
    assert!(meta.is_latest());
    assert_eq!(meta.layout, MetadataLayout::KeyValue);

    let conn = Connection::open(&db).unwrap();
    let indexes: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_tag_tag_name'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(indexes, 1);

    assert_eq!(catalog.get_file_by_path("/m/old.png").unwrap().stars(), 3);
}

#[test]
fn extension_keys_persist_and_reserved_keys_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("catalog.db");
    {
        let catalog = Catalog::open(&db).unwrap();
        catalog.set_metadata_value("owner", serde_json::json!("sam")).unwrap();
        assert!(matches!(
            catalog.set_metadata_value("majorVersion", serde_json::json!(9)),
            Err(CatalogError::Validation(_))
        ));
    }
    let catalog = Catalog::open(&db).unwrap();
    let meta = catalog.metadata().unwrap();
    assert_eq!(meta.extensions.get("owner"), Some(&serde_json::json!("sam")));
    assert_eq!(meta.major, 3);
}
