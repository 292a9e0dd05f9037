// FILE: src/engine/mod.rs
//! Work that touches the filesystem: scanning for media and fingerprinting it.
pub mod fingerprint;
pub mod refresh;
pub mod scanner;

pub use fingerprint::{
    fingerprint_files, hash_file, verify_fingerprints, FingerprintOptions, Progress, DEFAULT_WORKERS,
};
pub use refresh::RefreshSummary;
pub use scanner::Scanner;
