//! In-memory validator store with write-through persistence.
//!
//! Maps request keys to the last validator (ETag) the API returned for them.
//! Every lookup and mutation is a short synchronous critical section;
//! persistence happens on spawned tasks and never blocks or fails a caller.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

use super::persistence::{ValidatorMap, ValidatorPersistence, ValidatorRecord};
use crate::clock::{Clock, SystemClock};

struct Inner {
    records: HashMap<String, ValidatorRecord>,
    generation: u64,
}

impl Inner {
    /// Snapshot generations follow wall-clock micros so they keep increasing
    /// across restarts; within a process they are strictly increasing.
    fn next_generation(&mut self) -> u64 {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        self.generation = now.max(self.generation + 1);
        self.generation
    }

    fn snapshot(&self) -> ValidatorMap {
        self.records.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Validator store keyed by request key.
pub struct ValidatorStore {
    inner: Mutex<Inner>,
    persistence: Arc<dyn ValidatorPersistence>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ValidatorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorStore")
            .field("len", &self.len())
            .field("max_age", &self.max_age)
            .field("persistence", &self.persistence)
            .finish()
    }
}

impl ValidatorStore {
    /// Open a store, hydrating it from `persistence`.
    ///
    /// Records already past `max_age` are dropped at load time. Unreadable
    /// or corrupt persisted content is logged and the store starts empty.
    pub async fn open(persistence: Arc<dyn ValidatorPersistence>, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let loaded = match persistence.load().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("failed to load validators, starting empty: {}", e);
                ValidatorMap::new()
            }
        };

        let total = loaded.len();
        let records: HashMap<String, ValidatorRecord> = loaded
            .into_iter()
            .filter(|(_, record)| now - record.stored_at < max_age)
            .collect();

        tracing::debug!("hydrated {} validators ({} expired at load)", records.len(), total - records.len());

        Self {
            inner: Mutex::new(Inner { records, generation: 0 }),
            persistence,
            clock,
            max_age,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// A memory-only store on the system clock.
    pub fn in_memory(max_age: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { records: HashMap::new(), generation: 0 }),
            persistence: Arc::new(super::persistence::NoPersistence),
            clock: Arc::new(SystemClock),
            max_age,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, record: &ValidatorRecord, now: chrono::DateTime<Utc>) -> bool {
        now - record.stored_at < self.max_age
    }

    /// Get the validator for `key`, if present and not expired.
    ///
    /// An expired record is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.records.get(key) {
            Some(record) if self.is_fresh(record, now) => Some(record.validator.clone()),
            Some(_) => {
                inner.records.remove(key);
                tracing::debug!("validator for {} expired", key);
                None
            }
            None => None,
        }
    }

    /// Get the full record for `key` without expiry side effects.
    pub fn record(&self, key: &str) -> Option<ValidatorRecord> {
        self.lock().records.get(key).cloned()
    }

    /// Insert or replace the validator for `key`.
    ///
    /// `storedAt` never moves backwards for a key, even if the clock does.
    pub fn set(&self, key: &str, validator: &str) {
        let now = self.clock.now();
        let mut inner = self.lock();
        let stored_at = match inner.records.get(key) {
            Some(previous) if previous.stored_at > now => previous.stored_at,
            _ => now,
        };
        inner
            .records
            .insert(key.to_string(), ValidatorRecord { validator: validator.to_string(), stored_at });
        tracing::debug!("stored validator {} for {}", validator, key);
        self.write_through(&mut inner);
    }

    /// Remove the validator for `key`. Returns whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.records.remove(key).is_some();
        if removed {
            self.write_through(&mut inner);
        }
        removed
    }

    /// Whether a record exists for `key`, expired or not.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().records.contains_key(key)
    }

    /// Remove every key containing `pattern`, or everything when `None`.
    ///
    /// Returns the number of removed records.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        match pattern {
            Some(pattern) => self.clear_where(|key| key.contains(pattern)),
            None => self.clear_where(|_| true),
        }
    }

    /// Remove every key for which `matches` returns true.
    pub fn clear_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut inner = self.lock();
        let before = inner.records.len();
        inner.records.retain(|key, _| !matches(key));
        let removed = before - inner.records.len();
        if removed > 0 {
            tracing::debug!("cleared {} validators", removed);
            self.write_through(&mut inner);
        }
        removed
    }

    /// Remove every expired record. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.records.len();
        inner.records.retain(|_, record| now - record.stored_at < self.max_age);
        let removed = before - inner.records.len();
        if removed > 0 {
            tracing::debug!("swept {} expired validators", removed);
            self.write_through(&mut inner);
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `every` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.sweep();
            }
        })
    }

    /// Number of records currently held (expired ones included until swept).
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all records, sorted by key.
    pub fn snapshot(&self) -> ValidatorMap {
        self.lock().snapshot()
    }

    /// Wait for all write-through tasks started so far.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("validator write-through task failed: {}", e);
            }
        }
    }

    fn write_through(&self, inner: &mut Inner) {
        let generation = inner.next_generation();
        let snapshot = inner.snapshot();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime; validator snapshot {} kept in memory only", generation);
            return;
        };

        let persistence = Arc::clone(&self.persistence);
        let handle = runtime.spawn(async move {
            if let Err(e) = persistence.save(&snapshot, generation).await {
                tracing::warn!("failed to persist validators: {}", e);
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}
