// FILE: src/core/record.rs
//! Catalog Record: one media file and its mutable attributes.
//!
//! Records are plain in-memory values. They only become persisted once the
//! catalog assigns them an id through `Catalog::add_files`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::{CatalogError, Result};

/// Highest star rating a file can carry.
pub const MAX_STARS: u8 = 5;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Lower-cases and trims a tag. Returns `None` for tags that end up empty.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let normalized = tag.trim().to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Checks that `hash` looks like a lowercase hex SHA-256 digest.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_HEX_LEN && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// 0 until the catalog persists the record.
    pub(crate) id: i64,
    pub(crate) path: String,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) last_viewed: DateTime<Utc>,
    pub(crate) stars: u8,
    pub(crate) size: Option<u64>,
    pub(crate) hash: Option<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            id: 0,
            path: path.into(),
            tags: BTreeSet::new(),
            last_viewed: DateTime::<Utc>::default(),
            stars: 0,
            size: None,
            hash: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// True once the catalog has assigned an id.
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Adds a tag after normalizing it. Empty and duplicate tags are refused.
    pub fn add_tag(&mut self, tag: &str) -> Result<()> {
        let tag = normalize_tag(tag)
            .ok_or_else(|| CatalogError::Validation("cannot use empty tag".into()))?;
        if self.tags.contains(&tag) {
            return Err(CatalogError::Validation(format!("duplicate tag '{}'", tag)));
        }
        self.tags.insert(tag);
        Ok(())
    }

    /// Removes a tag. Removing a tag the record doesn't carry does nothing.
    pub fn remove_tag(&mut self, tag: &str) {
        if let Some(tag) = normalize_tag(tag) {
            self.tags.remove(&tag);
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        normalize_tag(tag).map_or(false, |t| self.tags.contains(&t))
    }

    pub fn last_viewed(&self) -> DateTime<Utc> {
        self.last_viewed
    }

    pub fn set_last_viewed(&mut self, at: DateTime<Utc>) {
        self.last_viewed = at.trunc_subsecs(0);
    }

    /// Marks the file as viewed right now (whole seconds).
    pub fn mark_viewed(&mut self) {
        self.set_last_viewed(Utc::now());
    }

    pub fn stars(&self) -> u8 {
        self.stars
    }

    pub fn set_stars(&mut self, stars: u8) -> Result<()> {
        if stars > MAX_STARS {
            return Err(CatalogError::Validation(format!(
                "max star value is {}, got {}",
                MAX_STARS, stars
            )));
        }
        self.stars = stars;
        Ok(())
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn set_size(&mut self, size: Option<u64>) {
        self.size = size;
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn set_hash(&mut self, hash: &str) -> Result<()> {
        let hash = hash.to_ascii_lowercase();
        if !is_valid_hash(&hash) {
            return Err(CatalogError::Validation(format!(
                "hash must be {} hex characters",
                HASH_HEX_LEN
            )));
        }
        self.hash = Some(hash);
        Ok(())
    }

    pub fn clear_hash(&mut self) {
        self.hash = None;
    }

    /// Refuses records that were never persisted (or were since removed).
    pub(crate) fn ensure_persisted(&self) -> Result<()> {
        if self.id == 0 {
            return Err(CatalogError::Validation(format!(
                "file '{}' has no catalog id",
                self.path
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id: {}, stars: {}, tags: {})", self.path, self.id, self.stars, self.tags.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_unpersisted() {
        let f = FileRecord::new("/media/a.png");
        assert_eq!(f.id(), 0);
        assert!(!f.is_persisted());
        assert_eq!(f.last_viewed().timestamp(), 0);
        assert_eq!(f.stars(), 0);
        assert!(f.size().is_none());
        assert!(f.hash().is_none());
        assert!(f.ensure_persisted().is_err());
    }

    #[test]
    fn tags_are_normalized_and_unique() {
        let mut f = FileRecord::new("a");
        f.add_tag("Cats").unwrap();
        assert!(f.has_tag("cats"));
        assert!(f.has_tag("CATS"));
        assert!(matches!(f.add_tag("cats"), Err(CatalogError::Validation(_))));
        assert!(matches!(f.add_tag("   "), Err(CatalogError::Validation(_))));
        assert_eq!(f.tags().len(), 1);
    }

    #[test]
    fn removing_missing_tag_is_noop() {
        let mut f = FileRecord::new("a");
        f.add_tag("a").unwrap();
        f.add_tag("b").unwrap();
        f.remove_tag("zzz");
        assert_eq!(f.tags().len(), 2);
        f.remove_tag("A");
        assert_eq!(f.tags().iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn stars_are_range_checked() {
        let mut f = FileRecord::new("a");
        for s in 0..=5 {
            f.set_stars(s).unwrap();
            assert_eq!(f.stars(), s);
        }
        assert!(f.set_stars(6).is_err());
        assert_eq!(f.stars(), 5);
    }

    #[test]
    fn mark_viewed_truncates_to_seconds() {
        let mut f = FileRecord::new("a");
        f.mark_viewed();
        assert_eq!(f.last_viewed().timestamp_subsec_nanos(), 0);
        assert!(f.last_viewed().timestamp() > 0);
    }

    #[test]
    fn hash_must_be_hex_digest() {
        let mut f = FileRecord::new("a");
        assert!(f.set_hash("abc").is_err());
        assert!(f.set_hash(&"g".repeat(64)).is_err());
        f.set_hash(&"AB".repeat(32)).unwrap();
        assert_eq!(f.hash(), Some("ab".repeat(32).as_str()));
    }
}
