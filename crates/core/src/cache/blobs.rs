//! Bounded FIFO store for fetched media.
//!
//! Records are immutable once inserted and are evicted strictly in insertion
//! order when the capacity is exceeded; reads never promote. Payloads are
//! reference counted, so a [`BlobHandle`] handed out before an eviction or a
//! clear keeps working for whoever holds it.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::hash::content_digest;
use crate::clock::{Clock, SystemClock};

/// Default number of records kept.
pub const DEFAULT_BLOB_CAPACITY: usize = 100;

/// A local reference to a cached payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug, PartialEq, Eq)]
struct HandleInner {
    source_url: String,
    payload: Bytes,
    content_type: Option<String>,
    digest: String,
}

impl BlobHandle {
    pub fn new(source_url: impl Into<String>, payload: Bytes, content_type: Option<String>) -> Self {
        let digest = content_digest(&payload);
        Self { inner: Arc::new(HandleInner { source_url: source_url.into(), payload, content_type, digest }) }
    }

    pub fn source_url(&self) -> &str {
        &self.inner.source_url
    }

    pub fn payload(&self) -> &Bytes {
        &self.inner.payload
    }

    pub fn content_type(&self) -> Option<&str> {
        self.inner.content_type.as_deref()
    }

    pub fn len(&self) -> usize {
        self.inner.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.payload.is_empty()
    }

    /// SHA-256 hex digest of the payload.
    pub fn digest(&self) -> &str {
        &self.inner.digest
    }

    /// Stable local URL for the payload, `blob:gallery/<digest prefix>`.
    pub fn object_url(&self) -> String {
        format!("blob:gallery/{}", &self.inner.digest[..16])
    }

    /// Whether two handles share the same payload allocation.
    pub fn ptr_eq(&self, other: &BlobHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug)]
struct Record {
    handle: BlobHandle,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, Record>,
    order: VecDeque<String>,
}

impl Inner {
    fn remove(&mut self, url: &str) -> Option<Record> {
        let record = self.records.remove(url)?;
        self.order.retain(|u| u != url);
        Some(record)
    }
}

/// FIFO media store with TTL.
#[derive(Debug)]
pub struct BlobStore {
    inner: Mutex<Inner>,
    capacity: usize,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl BlobStore {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self::with_clock(capacity, max_age, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        debug_assert!(capacity > 0, "blob store capacity must be positive");
        Self { inner: Mutex::new(Inner::default()), capacity: capacity.max(1), max_age, clock }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live record for `url`. An expired record is dropped on read.
    pub fn get(&self, url: &str) -> Option<BlobHandle> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let fresh = match inner.records.get(url) {
            Some(record) => now - record.stored_at < self.max_age,
            None => return None,
        };
        if fresh {
            inner.records.get(url).map(|record| record.handle.clone())
        } else {
            inner.remove(url);
            tracing::debug!("blob for {} expired", url);
            None
        }
    }

    /// Insert a payload for `url`, evicting the oldest records beyond capacity.
    ///
    /// If a live record already exists it is kept and its handle returned.
    pub fn insert(&self, url: &str, payload: Bytes, content_type: Option<String>) -> BlobHandle {
        let now = self.clock.now();
        let mut inner = self.lock();

        if let Some(existing) = inner.records.get(url) {
            if now - existing.stored_at < self.max_age {
                return existing.handle.clone();
            }
            inner.remove(url);
        }

        let handle = BlobHandle::new(url, payload, content_type);
        inner.records.insert(url.to_string(), Record { handle: handle.clone(), stored_at: now });
        inner.order.push_back(url.to_string());

        while inner.records.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.records.remove(&oldest);
            tracing::debug!("evicted blob {}", oldest);
        }

        debug_assert!(inner.records.len() <= self.capacity);
        debug_assert_eq!(inner.records.len(), inner.order.len());
        handle
    }

    pub fn remove(&self, url: &str) -> bool {
        self.lock().remove(url).is_some()
    }

    /// Whether a live record exists for `url`.
    pub fn contains(&self, url: &str) -> bool {
        let now = self.clock.now();
        self.lock()
            .records
            .get(url)
            .is_some_and(|record| now - record.stored_at < self.max_age)
    }

    /// Drop every record. Outstanding handles remain valid.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.records.len();
        inner.records.clear();
        inner.order.clear();
        count
    }

    /// Drop every expired record.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.records.len();
        inner.records.retain(|_, record| now - record.stored_at < self.max_age);
        let Inner { records, order } = &mut *inner;
        order.retain(|url| records.contains_key(url));
        before - inner.records.len()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached URLs, oldest first.
    pub fn urls(&self) -> Vec<String> {
        self.lock().order.iter().cloned().collect()
    }
}
