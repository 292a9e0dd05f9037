// FILE: src/engine/refresh.rs
use std::path::PathBuf;

use crate::core::FileRecord;
use crate::engine::fingerprint::{fingerprint_files, FingerprintOptions};
use crate::error::{CatalogError, Result};
use crate::storage::{BatchFailure, Catalog, HashFilter, SearchQuery};

/// What a fingerprint refresh did.
#[derive(Debug, Default)]
pub struct RefreshSummary {
    /// Files that had no hash when the refresh started.
    pub candidates: usize,
    /// Files the pipeline couldn't hash.
    pub unhashed: Vec<PathBuf>,
    /// Records the catalog refused to store.
    pub failures: Vec<BatchFailure>,
}

impl Catalog {
    /// Fingerprint every file that has no hash yet and store the results.
    ///
    /// Unreadable files don't stop the refresh; whatever the pipeline did
    /// compute is still written.
    pub async fn refresh_fingerprints(&self, options: &FingerprintOptions) -> Result<RefreshSummary> {
        let search = SearchQuery {
            hash: Some(HashFilter::Unset),
            count: -1,
            ..Default::default()
        };
        let mut files = self.search_files(&search)?;
        if files.is_empty() {
            tracing::info!("[Fingerprint] Nothing to refresh");
            return Ok(RefreshSummary::default());
        }

        let mut summary = RefreshSummary { candidates: files.len(), ..Default::default() };
        summary.unhashed = tolerate_incomplete(fingerprint_files(&mut files, options).await)?;

        summary.failures = self.apply_fingerprints(&files)?;
        for failure in &summary.failures {
            tracing::warn!("[Fingerprint] Could not store {}: {}", failure.path, failure.error);
        }
        Ok(summary)
    }

    /// Fingerprint new records, then insert them with `add_files`.
    ///
    /// Files the pipeline can't read are still inserted without the missing
    /// fields. A file whose content is already catalogued fails on the hash
    /// and shows up in the returned list like any other rejected row.
    pub async fn add_files_with_fingerprints(
        &self,
        records: &mut [FileRecord],
        options: &FingerprintOptions,
    ) -> Result<Vec<BatchFailure>> {
        self.ensure_usable()?;
        if !records.is_empty() {
            let unreadable = tolerate_incomplete(fingerprint_files(records, options).await)?;
            if !unreadable.is_empty() {
                tracing::warn!("[Fingerprint] Importing {} files without a hash", unreadable.len());
            }
        }
        self.add_files(records)
    }
}

/// An incomplete batch is expected when files vanish or can't be read;
/// hand back the paths still missing a hash and keep going.
fn tolerate_incomplete(result: Result<()>) -> Result<Vec<PathBuf>> {
    match result {
        Ok(()) => Ok(Vec::new()),
        Err(CatalogError::IncompleteFingerprints { missing_hash, missing_size }) => {
            tracing::warn!(
                "[Fingerprint] {} files without hash, {} without size",
                missing_hash.len(),
                missing_size.len()
            );
            Ok(missing_hash)
        }
        Err(e) => Err(e),
    }
}
