//! Cache state for the gallery client.
//!
//! - Canonical request keys
//! - Validator (ETag) store with write-through persistence
//! - SQLite key-value slots backing that persistence (WAL mode, migrations)
//! - FIFO blob store for fetched media

pub mod blobs;
pub mod connection;
pub mod hash;
pub mod key;
pub mod migrations;
pub mod persistence;
pub mod slots;
pub mod validators;

pub use crate::Error;

pub use blobs::{BlobHandle, BlobStore, DEFAULT_BLOB_CAPACITY};
pub use connection::CacheDb;
pub use key::{CacheKey, cache_key, canonical_params, encode_query, key_from_pairs};
pub use persistence::{
    MemoryPersistence, NoPersistence, SqlitePersistence, VALIDATOR_SLOT, ValidatorMap, ValidatorPersistence,
    ValidatorRecord,
};
pub use validators::ValidatorStore;
