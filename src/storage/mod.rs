// FILE: src/storage/mod.rs
pub mod connection;
pub mod init;
pub mod migration;
pub mod query;
pub mod repository;
pub mod version;

// Common exports
pub use migration::MigrationReport;
pub use query::{HashFilter, SearchQuery, SortMethod, DEFAULT_COUNT};
pub use repository::{BatchFailure, Catalog, DEFAULT_BUSY_TIMEOUT};
pub use version::{CatalogMetadata, MetadataLayout, MAJOR_VERSION, MINOR_VERSION, REVISION};
