//! Conditional requests against the media API.
//!
//! [`ConditionalClient`] looks up the validator stored for a request key,
//! sends it as `If-None-Match`, and classifies the response:
//!
//! - 2xx: store the new validator and retain the payload (`Changed`)
//! - 304: replay the retained payload, no store write (`Unchanged`)
//! - anything else: error, no store write
//!
//! Writes for one key are ordered by ticket: a response whose request was
//! issued before an already committed one is returned to its caller but
//! never overwrites the newer state.
//!
//! Retained payloads live exactly as long as their validator: they are
//! dropped when the validator expires, is swept, or is cleared.

use bytes::Bytes;
use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;

use gallery_core::cache::{CacheKey, canonical_params, key_from_pairs};
use gallery_core::{Error, ValidatorStore};

use crate::fetch::{FetchClient, FetchResponse, endpoint_url};

/// Result of a conditional request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    /// Fresh payload from the server.
    Changed(T),
    /// Server confirmed the stored validator; payload replayed from memory.
    Unchanged(T),
}

impl<T> FetchOutcome<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, FetchOutcome::Unchanged(_))
    }

    pub fn get(&self) -> &T {
        match self {
            FetchOutcome::Changed(value) | FetchOutcome::Unchanged(value) => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            FetchOutcome::Changed(value) | FetchOutcome::Unchanged(value) => value,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchOutcome<U> {
        match self {
            FetchOutcome::Changed(value) => FetchOutcome::Changed(f(value)),
            FetchOutcome::Unchanged(value) => FetchOutcome::Unchanged(f(value)),
        }
    }
}

/// An API request: method, path and canonical parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new<P: Serialize + ?Sized>(method: Method, path: impl Into<String>, params: &P) -> Self {
        Self { method, path: path.into(), params: canonical_params(params) }
    }

    pub fn get<P: Serialize + ?Sized>(path: impl Into<String>, params: &P) -> Self {
        Self::new(Method::GET, path, params)
    }

    pub fn delete<P: Serialize + ?Sized>(path: impl Into<String>, params: &P) -> Self {
        Self::new(Method::DELETE, path, params)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Path plus canonical query, e.g. `/gallery?folder=general&page=1`.
    pub fn cache_key(&self) -> CacheKey {
        key_from_pairs(&self.path, &self.params)
    }

    /// Key validators are stored under, e.g. `GET /gallery?folder=general`.
    pub fn request_key(&self) -> String {
        format!("{} {}", self.method, self.cache_key())
    }

    /// Only safe methods carry a conditional header.
    pub fn is_conditional(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    pub fn url(&self, base: &Url) -> Url {
        endpoint_url(base, &self.path, &self.params)
    }
}

#[derive(Debug, Default)]
struct State {
    next_ticket: u64,
    in_flight: BTreeSet<u64>,
    committed: HashMap<String, u64>,
    payloads: HashMap<String, Bytes>,
}

impl State {
    /// Drop payloads whose validator is gone, and tickets no running request
    /// can still race with. Returns the number of dropped payloads.
    fn prune(&mut self, validators: &ValidatorStore) -> usize {
        let before = self.payloads.len();
        self.payloads.retain(|key, _| validators.contains(key));

        let oldest = self.in_flight.first().copied();
        self.committed
            .retain(|key, &mut ticket| validators.contains(key) || oldest.is_some_and(|oldest| oldest < ticket));

        before - self.payloads.len()
    }
}

/// Marks a ticket as in flight until dropped, including on cancellation.
struct TicketGuard {
    state: Arc<Mutex<State>>,
    ticket: u64,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight.remove(&self.ticket);
    }
}

/// Validator-aware request executor.
#[derive(Debug, Clone)]
pub struct ConditionalClient {
    fetch: FetchClient,
    base: Url,
    validators: Arc<ValidatorStore>,
    state: Arc<Mutex<State>>,
}

impl ConditionalClient {
    pub fn new(fetch: FetchClient, base: Url, validators: Arc<ValidatorStore>) -> Self {
        Self { fetch, base, validators, state: Arc::new(Mutex::new(State::default())) }
    }

    pub fn validators(&self) -> &Arc<ValidatorStore> {
        &self.validators
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_ticket(&self, key: &str) -> TicketGuard {
        let mut state = self.lock();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.in_flight.insert(ticket);
        tracing::trace!("ticket {} for {}", ticket, key);
        TicketGuard { state: Arc::clone(&self.state), ticket }
    }

    fn retained(&self, key: &str) -> Option<Bytes> {
        self.lock().payloads.get(key).cloned()
    }

    /// Execute `request` and decode a JSON body into `T`.
    ///
    /// Decoding happens before anything is stored, so a malformed body
    /// leaves the validator store untouched.
    pub async fn execute<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<FetchOutcome<T>, Error> {
        self.run(request, |bytes| serde_json::from_slice(bytes).map_err(|e| Error::Parse(e.to_string())))
            .await
    }

    /// Execute `request` and return the raw body.
    pub async fn execute_raw(&self, request: &ApiRequest) -> Result<FetchOutcome<Bytes>, Error> {
        self.run(request, |bytes| Ok(bytes.clone())).await
    }

    async fn run<T>(
        &self, request: &ApiRequest, decode: impl Fn(&Bytes) -> Result<T, Error>,
    ) -> Result<FetchOutcome<T>, Error> {
        let key = request.request_key();
        let url = request.url(&self.base);
        let guard = self.take_ticket(&key);

        let validator = if request.is_conditional() { self.validators.get(&key) } else { None };
        if request.is_conditional() && validator.is_none() && self.lock().payloads.remove(&key).is_some() {
            tracing::debug!("dropped payload for {} with its expired validator", key);
        }

        let response = self
            .fetch
            .send(request.method().clone(), url.clone(), validator.as_deref())
            .await?;

        let response = if response.is_not_modified() {
            match self.retained(&key) {
                Some(payload) => {
                    tracing::debug!("{} unchanged, replaying retained payload", key);
                    return Ok(FetchOutcome::Unchanged(decode(&payload)?));
                }
                None => {
                    tracing::debug!("{} unchanged but nothing retained, refetching", key);
                    let retry = self.fetch.send(request.method().clone(), url, None).await?;
                    if retry.is_not_modified() {
                        return Err(Error::HttpStatus(304));
                    }
                    retry
                }
            }
        } else {
            response
        };

        let value = decode(&response.bytes)?;
        if request.is_conditional() {
            self.commit(&key, guard.ticket, &response);
        }
        Ok(FetchOutcome::Changed(value))
    }

    fn commit(&self, key: &str, ticket: u64, response: &FetchResponse) {
        let mut state = self.lock();
        if state.committed.get(key).is_some_and(|&last| last > ticket) {
            tracing::debug!("dropping stale response for {} (ticket {})", key, ticket);
            return;
        }
        state.committed.insert(key.to_string(), ticket);

        match &response.etag {
            Some(etag) => {
                self.validators.set(key, etag);
                state.payloads.insert(key.to_string(), response.bytes.clone());
            }
            None => {
                self.validators.remove(key);
                state.payloads.remove(key);
            }
        }
    }

    /// Drop validators and retained payloads for keys containing `pattern`,
    /// or everything when `None`.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        match pattern {
            Some(pattern) => self.clear_where(|key| key.contains(pattern)),
            None => self.clear_where(|_| true),
        }
    }

    /// Drop validators and retained payloads for keys `matches` accepts.
    pub fn clear_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut state = self.lock();
        state.payloads.retain(|key, _| !matches(key));
        self.validators.clear_where(matches)
    }

    /// Remove expired validators, then every payload and ticket that no
    /// longer has a validator. Returns the number of swept validators.
    pub fn sweep(&self) -> usize {
        sweep(&self.state, &self.validators)
    }

    /// Run [`sweep`](Self::sweep) every `every` until the client is dropped.
    pub fn spawn_sweeper(&self, every: std::time::Duration) -> JoinHandle<()> {
        let state = Arc::downgrade(&self.state);
        let validators = Arc::downgrade(&self.validators);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (Some(state), Some(validators)) = (Weak::upgrade(&state), Weak::upgrade(&validators)) else {
                    break;
                };
                sweep(&state, &validators);
            }
        })
    }

    /// Whether a payload is retained for `request`.
    pub fn has_payload(&self, request: &ApiRequest) -> bool {
        self.lock().payloads.contains_key(&request.request_key())
    }
}

fn sweep(state: &Mutex<State>, validators: &ValidatorStore) -> usize {
    let swept = validators.sweep();
    let dropped = state.lock().unwrap_or_else(PoisonError::into_inner).prune(validators);
    if swept > 0 || dropped > 0 {
        tracing::debug!("swept {} validators and {} retained payloads", swept, dropped);
    }
    swept
}
