//! Async blob cache over the core [`BlobStore`].
//!
//! A miss starts one fetch per URL on its own task and every concurrent
//! caller awaits the same shared future. The task populates the store
//! whether or not anyone is still waiting, so abandoning a resolve never
//! wastes the transfer. Failures fall back to the remote URL.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gallery_core::{AppConfig, BlobHandle, BlobStore, Error, GalleryItem};

use crate::fetch::{FetchClient, media_url};

/// Where a cell should load its image from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Cached payload.
    Local(BlobHandle),
    /// Uncached remote URL, used when fetching failed.
    Remote(String),
}

impl ImageSource {
    pub fn is_local(&self) -> bool {
        matches!(self, ImageSource::Local(_))
    }

    /// URL to render: the local object URL or the remote fallback.
    pub fn url(&self) -> String {
        match self {
            ImageSource::Local(handle) => handle.object_url(),
            ImageSource::Remote(url) => url.clone(),
        }
    }
}

/// Fetched bytes plus their declared content type.
#[derive(Debug, Clone)]
pub struct FetchedBlob {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Source of blob payloads.
#[async_trait]
pub trait BlobFetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, url: &str) -> Result<FetchedBlob, Error>;
}

/// Fetches media over HTTP, resolving relative URLs against the API base.
#[derive(Debug, Clone)]
pub struct HttpBlobFetcher {
    client: FetchClient,
    base: url::Url,
}

impl HttpBlobFetcher {
    pub fn new(client: FetchClient, base: url::Url) -> Self {
        Self { client, base }
    }
}

#[async_trait]
impl BlobFetcher for HttpBlobFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBlob, Error> {
        let url = media_url(&self.base, url)?;
        let response = self.client.get(url).await?;
        Ok(FetchedBlob { bytes: response.bytes, content_type: response.content_type })
    }
}

/// Outcome of a preload fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub requested: usize,
    pub cached: usize,
    pub failed: Vec<String>,
}

type InFlight = Shared<BoxFuture<'static, Option<BlobHandle>>>;

/// Shared media cache. Clones share the same store and in-flight table.
#[derive(Clone)]
pub struct BlobCache {
    store: Arc<BlobStore>,
    fetcher: Arc<dyn BlobFetcher>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCache")
            .field("store", &self.store)
            .field("fetcher", &self.fetcher)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl BlobCache {
    pub fn new(store: Arc<BlobStore>, fetcher: Arc<dyn BlobFetcher>) -> Self {
        Self { store, fetcher, in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Cache sized from config, fetching through `fetcher`.
    pub fn from_config(config: &AppConfig, fetcher: Arc<dyn BlobFetcher>) -> Self {
        Self::new(Arc::new(BlobStore::new(config.blob_capacity, config.blob_max_age())), fetcher)
    }

    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `url` to a local handle, fetching on a miss.
    pub async fn resolve(&self, url: &str) -> ImageSource {
        let pending = {
            let mut in_flight = self.in_flight();
            if let Some(handle) = self.store.get(url) {
                tracing::debug!("blob cache hit: {}", url);
                return ImageSource::Local(handle);
            }
            match in_flight.get(url) {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.start_fetch(url);
                    in_flight.insert(url.to_string(), pending.clone());
                    pending
                }
            }
        };

        match pending.await {
            Some(handle) => ImageSource::Local(handle),
            None => ImageSource::Remote(url.to_string()),
        }
    }

    fn start_fetch(&self, url: &str) -> InFlight {
        tracing::debug!("blob cache miss: {}", url);
        let url = url.to_string();
        let store = Arc::clone(&self.store);
        let fetcher = Arc::clone(&self.fetcher);
        let in_flight = Arc::clone(&self.in_flight);

        let task = tokio::spawn(async move {
            let handle = match fetcher.fetch(&url).await {
                Ok(blob) => Some(store.insert(&url, blob.bytes, blob.content_type)),
                Err(e) => {
                    tracing::warn!("failed to fetch {}, using remote URL: {}", url, e);
                    None
                }
            };
            in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&url);
            handle
        });

        async move { task.await.ok().flatten() }.boxed().shared()
    }

    /// Start resolving `url` in the background.
    pub fn preload(&self, url: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime, skipping preload of {}", url);
            return;
        };
        let cache = self.clone();
        let url = url.to_string();
        runtime.spawn(async move {
            cache.resolve(&url).await;
        });
    }

    /// Resolve every URL of the items around `center`.
    ///
    /// The window is `[center - size/2, center + size/2]` clamped to the
    /// item list. Thumbnails equal to the item URL are not fetched twice.
    /// One failing URL never prevents the others from being cached.
    pub async fn preload_window(&self, items: &[GalleryItem], center: usize, window_size: usize) -> PreloadReport {
        let urls = window_urls(items, center, window_size);
        let requested = urls.len();

        let results = join_all(urls.iter().map(|url| self.resolve(url))).await;

        let failed: Vec<String> = results
            .into_iter()
            .zip(urls)
            .filter(|(source, _)| !source.is_local())
            .map(|(_, url)| url)
            .collect();

        let report = PreloadReport { requested, cached: requested - failed.len(), failed };
        tracing::debug!("preloaded {}/{} around index {}", report.cached, report.requested, center);
        report
    }

    /// Drop every cached blob. Handles already given out stay valid.
    pub fn clear(&self) -> usize {
        self.store.clear()
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.store.contains(url)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Number of fetches currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }
}

/// URLs to preload for the items in the window around `center`, deduplicated.
pub fn window_urls(items: &[GalleryItem], center: usize, window_size: usize) -> Vec<String> {
    if items.is_empty() {
        return Vec::new();
    }
    let last = items.len() - 1;
    let center = center.min(last);
    let half = window_size / 2;
    let start = center.saturating_sub(half);
    let end = (center + half).min(last);

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for item in &items[start..=end] {
        for url in [&item.url, &item.thumbnail_url] {
            if seen.insert(url.as_str()) {
                urls.push(url.clone());
            }
        }
    }
    urls
}
