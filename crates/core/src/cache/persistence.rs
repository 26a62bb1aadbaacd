//! Persistence port for the validator store.
//!
//! The store keeps its working set in memory and mirrors it through a
//! [`ValidatorPersistence`] implementation. The on-disk shape is a flat JSON
//! map of `key -> { validator, storedAt }` with `storedAt` in epoch millis.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::connection::CacheDb;
use crate::Error;

/// Slot name used for the validator map in the key-value table.
pub const VALIDATOR_SLOT: &str = "validators";

/// A stored validator and when it was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub validator: String,
    #[serde(rename = "storedAt", with = "chrono::serde::ts_milliseconds")]
    pub stored_at: DateTime<Utc>,
}

/// Records keyed by request key, as persisted.
pub type ValidatorMap = BTreeMap<String, ValidatorRecord>;

/// Serialize a validator map to its persisted JSON form.
pub fn encode_records(records: &ValidatorMap) -> Result<String, Error> {
    Ok(serde_json::to_string(records)?)
}

/// Parse the persisted JSON form of a validator map.
pub fn decode_records(raw: &str) -> Result<ValidatorMap, Error> {
    Ok(serde_json::from_str(raw)?)
}

/// Durable backing store for validators.
///
/// `save` receives a full snapshot together with a generation number that
/// increases with every mutation; implementations must not let a lower
/// generation overwrite a higher one.
#[async_trait]
pub trait ValidatorPersistence: Send + Sync + std::fmt::Debug {
    async fn load(&self) -> Result<ValidatorMap, Error>;

    async fn save(&self, records: &ValidatorMap, generation: u64) -> Result<(), Error>;
}

/// Persistence that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

#[async_trait]
impl ValidatorPersistence for NoPersistence {
    async fn load(&self) -> Result<ValidatorMap, Error> {
        Ok(ValidatorMap::new())
    }

    async fn save(&self, _records: &ValidatorMap, _generation: u64) -> Result<(), Error> {
        Ok(())
    }
}

/// Validator map stored in a SQLite key-value slot.
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    db: CacheDb,
    slot: String,
}

impl SqlitePersistence {
    pub fn new(db: CacheDb) -> Self {
        Self { db, slot: VALIDATOR_SLOT.to_string() }
    }

    /// Use a custom slot name (e.g. one per API base URL).
    pub fn with_slot(db: CacheDb, slot: impl Into<String>) -> Self {
        Self { db, slot: slot.into() }
    }
}

#[async_trait]
impl ValidatorPersistence for SqlitePersistence {
    async fn load(&self) -> Result<ValidatorMap, Error> {
        match self.db.get_slot(&self.slot).await? {
            Some(raw) => decode_records(&raw),
            None => Ok(ValidatorMap::new()),
        }
    }

    async fn save(&self, records: &ValidatorMap, generation: u64) -> Result<(), Error> {
        let raw = encode_records(records)?;
        let applied = self.db.put_slot(&self.slot, &raw, generation).await?;
        if !applied {
            tracing::debug!("skipped stale validator snapshot (generation {})", generation);
        }
        Ok(())
    }
}

/// In-memory stand-in for a durable slot, used in tests.
///
/// Holds the raw JSON so corrupt content can be injected, counts saves and
/// can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    raw: Mutex<Option<String>>,
    generation: AtomicU64,
    saves: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given raw slot content.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self { raw: Mutex::new(Some(raw.into())), ..Self::default() }
    }

    /// Make every subsequent load and save fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of applied saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Current raw slot content.
    pub fn raw(&self) -> Option<String> {
        self.raw.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ValidatorPersistence for MemoryPersistence {
    async fn load(&self) -> Result<ValidatorMap, Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::CorruptSlot("slot unavailable".into()));
        }
        match self.raw() {
            Some(raw) => decode_records(&raw),
            None => Ok(ValidatorMap::new()),
        }
    }

    async fn save(&self, records: &ValidatorMap, generation: u64) -> Result<(), Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::CorruptSlot("slot unavailable".into()));
        }
        let encoded = encode_records(records)?;
        let mut raw = self.raw.lock().unwrap_or_else(PoisonError::into_inner);
        if generation <= self.generation.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.generation.store(generation, Ordering::SeqCst);
        *raw = Some(encoded);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
