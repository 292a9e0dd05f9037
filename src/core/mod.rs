// FILE: src/core/mod.rs
pub mod importable;
pub mod record;

pub use importable::Importable;
pub use record::{is_valid_hash, normalize_tag, FileRecord, HASH_HEX_LEN, MAX_STARS};
