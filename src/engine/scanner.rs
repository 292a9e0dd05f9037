// FILE: src/engine/scanner.rs
use std::path::Path;

use walkdir::WalkDir;

use crate::core::{FileRecord, Importable};
use crate::error::{CatalogError, Result};

/// Walks a directory tree and builds unpersisted records for media files.
pub struct Scanner;

impl Scanner {
    /// Every importable file under `root`, in path order, each tagged with
    /// `tags`. Hidden directories are not entered and symlinks are not
    /// followed. Unreadable entries are logged and skipped.
    pub fn scan_directory(root: &Path, extra_extensions: &[String], tags: &[String]) -> Result<Vec<FileRecord>> {
        if !root.is_dir() {
            return Err(CatalogError::Validation(format!("{} is not a directory", root.display())));
        }

        // Tags are validated once; each record is a copy of this template.
        let mut template = FileRecord::new("");
        for tag in tags {
            if template.has_tag(tag) {
                continue;
            }
            template.add_tag(tag)?;
        }

        let mut records = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("[Scanner] Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !Importable::is_media(entry.path(), extra_extensions) {
                continue;
            }
            let Some(path) = entry.path().to_str() else {
                tracing::warn!("[Scanner] Skipping non UTF-8 path {}", entry.path().display());
                continue;
            };

            let mut record = template.clone();
            record.set_path(path);
            records.push(record);
        }

        tracing::info!("[Scanner] Found {} media files under {}", records.len(), root.display());
        Ok(records)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}
