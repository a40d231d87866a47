//! Incremental, date-aware cache.
//!
//! A cached dataset is a hash: one field per row, keyed by the row's date, with a
//! single TTL on the whole key. Backends only move bytes; the record codec and the
//! row/field mapping live in `CacheStore`.

pub mod codec;
pub mod file;
pub mod memory;
pub mod store;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{CacheStore, HashStore, KeyInfo};

use thiserror::Error;

/// Cache failures. Callers of `CacheStore` never see these; they are logged and
/// turned into misses.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(String),

    #[error("record codec error: {0}")]
    Codec(String),

    #[error("corrupt field '{field}' under '{key}': {reason}")]
    Corrupt {
        key: String,
        field: String,
        reason: String,
    },

    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e.to_string())
    }
}
