use chrono::{TimeZone, Utc};
use mediacat::{Catalog, CatalogError, FileRecord, SearchQuery};
use tempfile::TempDir;

fn open_catalog() -> (TempDir, Catalog) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
    (dir, catalog)
}

fn record(path: &str, tags: &[&str]) -> FileRecord {
    let mut r = FileRecord::new(path);
    for t in tags {
        r.add_tag(t).unwrap();
    }
    r
}

#[test]
fn add_tag_then_has_tag() {
    let (_dir, catalog) = open_catalog();
    catalog.add_tag("Sunset").unwrap();
    assert!(catalog.has_tag("sunset").unwrap());

    let before = catalog.all_tags().unwrap();
    assert!(matches!(catalog.add_tag("sunset"), Err(CatalogError::Conflict(_))));
    assert_eq!(catalog.all_tags().unwrap(), before);
}

#[test]
fn remove_tag_unlinks_files() {
    let (_dir, catalog) = open_catalog();
    let mut files = vec![record("/m/a.png", &["beach", "sea"])];
    assert!(catalog.add_files(&mut files).unwrap().is_empty());

    catalog.remove_tag("beach").unwrap();
    assert!(!catalog.has_tag("beach").unwrap());
    let stored = catalog.get_file_by_id(files[0].id()).unwrap();
    assert_eq!(stored.tags().iter().collect::<Vec<_>>(), vec!["sea"]);

    assert!(catalog.remove_tag("beach").unwrap_err().is_not_found());
}

#[test]
fn update_roundtrips_fields_and_tags() {
    let (_dir, catalog) = open_catalog();
    let mut files = vec![record("/m/a.png", &["one", "two"])];
    catalog.add_files(&mut files).unwrap();
    let mut f = files.remove(0);

    f.set_path("/m/renamed.png");
    f.set_stars(4).unwrap();
    f.set_last_viewed(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());
    f.remove_tag("one");
    f.add_tag("three").unwrap();
    catalog.update_file(&f).unwrap();

    let stored = catalog.get_file_by_id(f.id()).unwrap();
    assert_eq!(stored.path(), "/m/renamed.png");
    assert_eq!(stored.stars(), 4);
    assert_eq!(stored.last_viewed(), f.last_viewed());
    assert_eq!(stored.tags(), f.tags());
    assert_eq!(catalog.get_file_by_path("/m/renamed.png").unwrap().id(), f.id());
}

#[test]
fn update_never_erases_a_stored_hash() {
    let (_dir, catalog) = open_catalog();
    let hash = "a".repeat(64);
    let mut f = FileRecord::new("/m/a.png");
    f.set_hash(&hash).unwrap();
    let mut files = vec![f];
    catalog.add_files(&mut files).unwrap();

    let mut f = files.remove(0);
    f.clear_hash();
    f.set_stars(2).unwrap();
    catalog.update_file(&f).unwrap();
    assert_eq!(catalog.get_file_by_id(f.id()).unwrap().hash(), Some(hash.as_str()));
}

#[test]
fn mutations_require_a_persisted_record() {
    let (_dir, catalog) = open_catalog();
    let mut f = FileRecord::new("/m/a.png");
    assert!(matches!(catalog.update_file(&f), Err(CatalogError::Validation(_))));
    assert!(matches!(catalog.remove_file(&mut f), Err(CatalogError::Validation(_))));
}

#[test]
fn remove_file_resets_id() {
    let (_dir, catalog) = open_catalog();
    let mut files = vec![record("/m/a.png", &["x"])];
    catalog.add_files(&mut files).unwrap();
    let id = files[0].id();

    catalog.remove_file(&mut files[0]).unwrap();
    assert_eq!(files[0].id(), 0);
    assert!(catalog.get_file_by_id(id).unwrap_err().is_not_found());
    assert_eq!(catalog.file_count().unwrap(), 0);

    // Safe to insert again; ids are never reused.
    catalog.add_files(&mut files).unwrap();
    assert!(files[0].id() > id);
}

#[test]
fn duplicate_path_is_a_per_item_failure() {
    let (_dir, catalog) = open_catalog();
    let mut existing = vec![FileRecord::new("/m/b.png")];
    catalog.add_files(&mut existing).unwrap();

    let mut batch = vec![
        record("/m/a.png", &["t"]),
        record("/m/b.png", &["t"]),
        record("/m/c.png", &["t"]),
    ];
    let failures = catalog.add_files(&mut batch).unwrap();

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
    assert_eq!(failures[0].path, "/m/b.png");
    assert!(matches!(failures[0].error, CatalogError::Conflict(_)));
    assert_ne!(batch[0].id(), 0);
    assert_eq!(batch[1].id(), 0);
    assert_ne!(batch[2].id(), 0);
    assert_eq!(catalog.file_count().unwrap(), 3);
}

#[test]
fn tag_failure_rolls_back_the_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("catalog.db");
    let catalog = Catalog::open(&db).unwrap();

    let raw = rusqlite::Connection::open(&db).unwrap();
    raw.execute_batch(
        "CREATE TRIGGER refuse_tag BEFORE INSERT ON tag_name
         WHEN NEW.value = 'forbidden'
         BEGIN SELECT RAISE(ABORT, 'tag refused'); END;",
    )
    .unwrap();
    drop(raw);

    let mut batch = vec![
        record("/m/a.png", &["fine"]),
        record("/m/a.png", &[]),
        record("/m/b.png", &["forbidden"]),
    ];
    assert!(catalog.add_files(&mut batch).is_err());
    assert!(batch.iter().all(|r| r.id() == 0));
    assert_eq!(catalog.file_count().unwrap(), 0);
    assert!(!catalog.has_tag("fine").unwrap());
}

#[test]
fn unset_and_zero_sizes_stay_distinct() {
    let (_dir, catalog) = open_catalog();
    let mut empty = FileRecord::new("/m/empty.png");
    empty.set_size(Some(0));
    let mut files = vec![empty, FileRecord::new("/m/unknown.png")];
    catalog.add_files(&mut files).unwrap();

    assert_eq!(catalog.get_file_by_path("/m/empty.png").unwrap().size(), Some(0));
    assert_eq!(catalog.get_file_by_path("/m/unknown.png").unwrap().size(), None);
}

#[test]
fn concurrent_readers_and_writer() {
    let (_dir, catalog) = open_catalog();
    let catalog = std::sync::Arc::new(catalog);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let catalog = std::sync::Arc::clone(&catalog);
            std::thread::spawn(move || {
                for i in 0..10 {
                    let mut files = vec![record(&format!("/m/{}-{}.png", t, i), &["shared"])];
                    assert!(catalog.add_files(&mut files).unwrap().is_empty());
                    catalog.search_files(&SearchQuery::default()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(catalog.file_count().unwrap(), 40);
    assert_eq!(catalog.all_tags().unwrap().len(), 1);
}

#[test]
fn failed_update_leaves_stored_record_untouched() {
    let (_dir, catalog) = open_catalog();
    let mut files = vec![record("/m/a.png", &["x"]), record("/m/b.png", &[])];
    catalog.add_files(&mut files).unwrap();

    let mut f = files[0].clone();
    f.set_path("/m/b.png");
    f.set_stars(5).unwrap();
    f.add_tag("y").unwrap();
    assert!(matches!(catalog.update_file(&f), Err(CatalogError::Conflict(_))));

    let stored = catalog.get_file_by_id(f.id()).unwrap();
    assert_eq!(stored.path(), "/m/a.png");
    assert_eq!(stored.stars(), 0);
    assert_eq!(stored.tags().iter().collect::<Vec<_>>(), vec!["x"]);
    assert!(!catalog.has_tag("y").unwrap());
}

#[test]
fn tag_failure_after_row_update_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("catalog.db");
    let catalog = Catalog::open(&db).unwrap();
    let mut files = vec![record("/m/a.png", &["x"])];
    catalog.add_files(&mut files).unwrap();

    let raw = rusqlite::Connection::open(&db).unwrap();
    raw.execute_batch(
        "CREATE TRIGGER refuse_tag BEFORE INSERT ON tag_name
         WHEN NEW.value = 'forbidden'
         BEGIN SELECT RAISE(ABORT, 'tag refused'); END;",
    )
    .unwrap();
    drop(raw);

    let mut f = files.remove(0);
    f.set_path("/m/moved.png");
    f.set_stars(3).unwrap();
    f.remove_tag("x");
    f.add_tag("forbidden").unwrap();
    assert!(catalog.update_file(&f).is_err());

    let stored = catalog.get_file_by_id(f.id()).unwrap();
    assert_eq!(stored.path(), "/m/a.png");
    assert_eq!(stored.stars(), 0);
    assert_eq!(stored.tags().iter().collect::<Vec<_>>(), vec!["x"]);
}
