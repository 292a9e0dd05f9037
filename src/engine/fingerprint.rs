// FILE: src/engine/fingerprint.rs
//! Fingerprint pipeline: content hash and size for a batch of records.
//!
//! A fixed pool of workers pulls records off a shared queue. The work is
//! I/O bound, so the pool is wide and each read runs on the blocking pool.
//! Workers only touch the filesystem; persisting results is the caller's job.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::FileRecord;
use crate::error::{CatalogError, Result};

/// Workers used when the caller doesn't pick a width.
pub const DEFAULT_WORKERS: usize = 100;

/// Sent to the progress observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Total records processed so far, successful or not.
    Processed(u64),
    /// Every worker has exited.
    Finished,
}

#[derive(Debug, Clone)]
pub struct FingerprintOptions {
    /// Compute the SHA-256 content hash.
    pub hash: bool,
    /// Record the file size.
    pub size: bool,
    /// Pool width. 0 means `DEFAULT_WORKERS`.
    pub workers: usize,
    /// Stops workers from taking more work. Reads in flight still finish.
    pub cancel: CancellationToken,
    pub progress: Option<mpsc::UnboundedSender<Progress>>,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            hash: true,
            size: true,
            workers: DEFAULT_WORKERS,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }
}

struct Job {
    index: usize,
    path: PathBuf,
}

#[derive(Debug, Default)]
struct Fingerprint {
    hash: Option<String>,
    size: Option<u64>,
}

/// SHA-256 of the whole file, lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn compute(path: &Path, want_hash: bool, want_size: bool) -> Fingerprint {
    let mut fp = Fingerprint::default();
    if want_hash {
        match hash_file(path) {
            Ok(h) => fp.hash = Some(h),
            Err(e) => tracing::warn!("[Fingerprint] Failed to hash {}: {}", path.display(), e),
        }
    }
    if want_size {
        match std::fs::metadata(path) {
            Ok(meta) => fp.size = Some(meta.len()),
            Err(e) => tracing::warn!("[Fingerprint] Failed to stat {}: {}", path.display(), e),
        }
    }
    fp
}

struct Worker {
    queue: Arc<Mutex<VecDeque<Job>>>,
    processed: Arc<AtomicU64>,
    want_hash: bool,
    want_size: bool,
    cancel: CancellationToken,
    progress: Option<mpsc::UnboundedSender<Progress>>,
}

impl Worker {
    fn next_job(&self) -> Option<Job> {
        self.queue.lock().ok()?.pop_front()
    }

    async fn run(self, worker_id: usize) -> Vec<(usize, Fingerprint)> {
        let mut done = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!("[Fingerprint] Worker {} cancelled", worker_id);
                break;
            }
            let Some(job) = self.next_job() else {
                break;
            };

            let (want_hash, want_size) = (self.want_hash, self.want_size);
            let path = job.path.clone();
            let fp = tokio::task::spawn_blocking(move || compute(&path, want_hash, want_size))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("[Fingerprint] Task for {} failed: {}", job.path.display(), e);
                    Fingerprint::default()
                });
            done.push((job.index, fp));

            let n = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
            if let Some(tx) = &self.progress {
                let _ = tx.send(Progress::Processed(n));
            }
        }
        done
    }
}

/// Compute the requested fingerprints for every record in place.
///
/// A file that can't be read or stat'd is logged and left without that
/// field; the batch carries on. Once all workers are done the batch is
/// checked with `verify_fingerprints`, so an `IncompleteFingerprints` error
/// means the other records were still filled in.
pub async fn fingerprint_files(records: &mut [FileRecord], options: &FingerprintOptions) -> Result<()> {
    if !options.hash && !options.size {
        return Err(CatalogError::Validation("hash or size must be requested".into()));
    }
    if records.is_empty() {
        return Err(CatalogError::Validation("no files to fingerprint".into()));
    }

    let width = match options.workers {
        0 => DEFAULT_WORKERS,
        n => n,
    }
    .min(records.len());

    let queue: VecDeque<Job> = records
        .iter()
        .enumerate()
        .map(|(index, r)| Job { index, path: PathBuf::from(&r.path) })
        .collect();
    let queue = Arc::new(Mutex::new(queue));
    let processed = Arc::new(AtomicU64::new(0));

    tracing::info!("[Fingerprint] Processing {} files with {} workers", records.len(), width);

    let handles: Vec<_> = (0..width)
        .map(|worker_id| {
            let worker = Worker {
                queue: Arc::clone(&queue),
                processed: Arc::clone(&processed),
                want_hash: options.hash,
                want_size: options.size,
                cancel: options.cancel.clone(),
                progress: options.progress.clone(),
            };
            tokio::spawn(worker.run(worker_id))
        })
        .collect();

    let mut results = Vec::with_capacity(records.len());
    let mut join_error = None;
    for handle in handles {
        match handle.await {
            Ok(done) => results.extend(done),
            Err(e) => join_error = Some(e),
        }
    }

    if let Some(tx) = &options.progress {
        let _ = tx.send(Progress::Finished);
    }
    if let Some(e) = join_error {
        return Err(CatalogError::Other(anyhow::anyhow!("Fingerprint worker panicked: {}", e)));
    }

    for (index, fp) in results {
        let record = &mut records[index];
        if let Some(hash) = fp.hash {
            record.hash = Some(hash);
        }
        if let Some(size) = fp.size {
            record.size = Some(size);
        }
    }

    tracing::info!(
        "[Fingerprint] Processed {} of {} files{}",
        processed.load(Ordering::Acquire),
        records.len(),
        if options.cancel.is_cancelled() { " (cancelled)" } else { "" }
    );
    verify_fingerprints(records, options)
}

/// Check that every record carries the fields `options` asked for.
pub fn verify_fingerprints(records: &[FileRecord], options: &FingerprintOptions) -> Result<()> {
    let missing_hash: Vec<PathBuf> = if options.hash {
        records.iter().filter(|r| r.hash.is_none()).map(|r| PathBuf::from(&r.path)).collect()
    } else {
        Vec::new()
    };
    let missing_size: Vec<PathBuf> = if options.size {
        records.iter().filter(|r| r.size.is_none()).map(|r| PathBuf::from(&r.path)).collect()
    } else {
        Vec::new()
    };

    if missing_hash.is_empty() && missing_size.is_empty() {
        Ok(())
    } else {
        Err(CatalogError::IncompleteFingerprints { missing_hash, missing_size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn rejects_empty_requests() {
        let mut none: Vec<FileRecord> = Vec::new();
        assert!(fingerprint_files(&mut none, &FingerprintOptions::default()).await.is_err());

        let mut one = vec![FileRecord::new("x")];
        let opts = FingerprintOptions { hash: false, size: false, ..Default::default() };
        assert!(matches!(fingerprint_files(&mut one, &opts).await, Err(CatalogError::Validation(_))));
    }

    #[test]
    fn verify_only_checks_requested_fields() {
        let mut r = FileRecord::new("x");
        r.size = Some(3);
        let records = vec![r];
        let size_only = FingerprintOptions { hash: false, ..Default::default() };
        assert!(verify_fingerprints(&records, &size_only).is_ok());
        match verify_fingerprints(&records, &FingerprintOptions::default()) {
            Err(CatalogError::IncompleteFingerprints { missing_hash, missing_size }) => {
                assert_eq!(missing_hash, vec![PathBuf::from("x")]);
                assert!(missing_size.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancelled_pipeline_takes_no_work() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"data").unwrap();
        let mut records = vec![FileRecord::new(path.to_str().unwrap())];

        let (tx, mut rx) = mpsc::unbounded_channel();
        let opts = FingerprintOptions { progress: Some(tx), ..Default::default() };
        opts.cancel.cancel();

        let result = fingerprint_files(&mut records, &opts).await;
        assert!(matches!(result, Err(CatalogError::IncompleteFingerprints { .. })));
        assert!(records[0].hash().is_none());
        assert_eq!(rx.recv().await, Some(Progress::Finished));
    }
}
