// FILE: src/core/importable.rs
//! Decides which files on disk are media the catalog should import.
//!
//! Media is defined as:
//! 1. Images (jpg, jpeg, png, gif)
//! 2. Audio (mp3, flac, wav)
//! 3. Video (webm, mp4, mov, m4v)
//! 4. Any extension the caller adds on top.
//!
//! Hidden files are never media.

use std::path::Path;

const MEDIA_EXTENSIONS: &[&str] = &[
    // Images
    "jpg", "jpeg", "png", "gif",
    // Audio
    "mp3", "flac", "wav",
    // Video
    "webm", "mp4", "mov", "m4v",
];

pub struct Importable;

impl Importable {
    /// True if `path` has a known media extension or one of `extra`.
    /// Extensions compare case-insensitively, with or without a leading dot.
    pub fn is_media(path: &Path, extra: &[String]) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_lowercase();

        if MEDIA_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
        extra
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}
