//! mediacat: a tagged media catalog on SQLite
//!
//! The crate is split into layers:
//! - core (the in-memory file record and the importable-media rules)
//! - storage (schema, versioning, migrations, search and the `Catalog` store)
//! - engine (directory scanning and the concurrent fingerprint pipeline)

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod storage;

pub use crate::core::{FileRecord, Importable};
pub use config::CatalogConfig;
pub use engine::{FingerprintOptions, Progress, RefreshSummary, Scanner};
pub use error::{CatalogError, Result};
pub use storage::{
    BatchFailure, Catalog, CatalogMetadata, HashFilter, MigrationReport, SearchQuery, SortMethod,
};
