//! Gallery API facade.
//!
//! The one entry point the UI layer talks to: listing pages through the
//! conditional cache, resolving and preloading media through the blob
//! cache, and invalidating both.

use std::sync::Arc;
use tokio::task::JoinHandle;

use gallery_core::cache::encode_query;
use gallery_core::{
    AppConfig, CacheDb, Error, GalleryItem, GalleryPage, GalleryQuery, GalleryResponse, ImageMetadata, ImageQuery,
    NoPersistence, SqlitePersistence, SystemClock, ThumbnailSize, ValidatorPersistence, ValidatorStore,
};

use crate::blobs::{BlobCache, HttpBlobFetcher, ImageSource, window_urls};
use crate::conditional::{ApiRequest, ConditionalClient, FetchOutcome};
use crate::fetch::{FetchClient, FetchConfig, parse_base};

/// Path of the paginated listing endpoint.
pub const GALLERY_PATH: &str = "/gallery";

/// Client for the gallery media API.
#[derive(Debug)]
pub struct GalleryClient {
    conditional: ConditionalClient,
    blobs: BlobCache,
    config: AppConfig,
    sweeper: Option<JoinHandle<()>>,
}

impl GalleryClient {
    /// Build a client around existing caches.
    pub fn new(config: AppConfig, validators: Arc<ValidatorStore>, blobs: BlobCache) -> Result<Self, Error> {
        let base = parse_base(&config.api_base_url)?;
        let fetch = FetchClient::new(FetchConfig::from(&config))?;
        let conditional = ConditionalClient::new(fetch, base, validators);
        Ok(Self { conditional, blobs, config, sweeper: None })
    }

    /// Build a client and its caches from configuration.
    ///
    /// Validators are persisted in the SQLite database at `db_path`; if it
    /// cannot be opened the client keeps validators in memory only. A
    /// background sweep drops expired validators, and the payloads retained
    /// with them, while the client lives.
    pub async fn from_config(config: AppConfig) -> Result<Self, Error> {
        config.validate()?;

        let persistence: Arc<dyn ValidatorPersistence> = match CacheDb::open(&config.db_path).await {
            Ok(db) => Arc::new(SqlitePersistence::new(db)),
            Err(e) => {
                tracing::warn!("validator cache unavailable at {}, memory only: {}", config.db_path.display(), e);
                Arc::new(NoPersistence)
            }
        };

        let validators =
            Arc::new(ValidatorStore::open(persistence, config.validator_max_age(), Arc::new(SystemClock)).await);

        let fetch = FetchClient::new(FetchConfig::from(&config))?;
        let base = parse_base(&config.api_base_url)?;
        let blobs = BlobCache::from_config(&config, Arc::new(HttpBlobFetcher::new(fetch, base)));

        let mut client = Self::new(config, validators, blobs)?;
        client.sweeper = Some(client.conditional.spawn_sweeper(client.config.validator_sweep_interval()));
        Ok(client)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn validators(&self) -> &Arc<ValidatorStore> {
        self.conditional.validators()
    }

    pub fn blobs(&self) -> &BlobCache {
        &self.blobs
    }

    /// Fetch a listing page, reporting whether it was replayed from cache.
    pub async fn fetch_page(
        &self, folder: &str, page: u32, page_size: u32, thumbnail: ThumbnailSize,
    ) -> Result<FetchOutcome<GalleryPage>, Error> {
        let query = GalleryQuery::new(folder, page, page_size);
        let request = ApiRequest::get(GALLERY_PATH, &query);

        let outcome = self.conditional.execute::<GalleryResponse>(&request).await?;
        let outcome = outcome.map(|response| GalleryPage::from_response(&response, &query, thumbnail));

        tracing::debug!(
            "{}: {} items (unchanged: {})",
            request.request_key(),
            outcome.get().items.len(),
            outcome.is_unchanged()
        );
        Ok(outcome)
    }

    /// Fetch a listing page. Network failures are returned to the caller.
    pub async fn get_page(
        &self, folder: &str, page: u32, page_size: u32, thumbnail: ThumbnailSize,
    ) -> Result<GalleryPage, Error> {
        Ok(self.fetch_page(folder, page, page_size, thumbnail).await?.into_inner())
    }

    /// Resolve an image URL to a local handle, or the remote URL on failure.
    pub async fn resolve_image(&self, url: &str) -> ImageSource {
        self.blobs.resolve(url).await
    }

    /// Start preloading the items around `index` in the background.
    pub fn preload_around(&self, items: &[GalleryItem], index: usize, window_size: usize) {
        for url in window_urls(items, index, window_size) {
            self.blobs.preload(&url);
        }
    }

    /// Drop cached API state for keys containing `pattern`; with no pattern
    /// drop every validator, retained payload and cached blob.
    pub fn clear_cache(&self, pattern: Option<&str>) {
        let removed = self.conditional.clear(pattern);
        if pattern.is_none() {
            let blobs = self.blobs.clear();
            tracing::debug!("cleared {} validators and {} blobs", removed, blobs);
        } else {
            tracing::debug!("cleared {} validators matching {:?}", removed, pattern);
        }
    }

    /// Metadata for one image.
    pub async fn get_image_metadata(&self, id: &str, folder: &str) -> Result<ImageMetadata, Error> {
        let request = ApiRequest::get(format!("/images/{id}/metadata"), &ImageQuery::new(folder));
        Ok(self.conditional.execute::<ImageMetadata>(&request).await?.into_inner())
    }

    /// Delete an image, then invalidate everything cached for it and its folder.
    pub async fn delete_image(&self, id: &str, folder: &str) -> Result<(), Error> {
        let request = ApiRequest::delete(format!("/images/{id}"), &ImageQuery::new(folder));
        self.conditional.execute_raw(&request).await?;

        self.invalidate_image(id);
        self.invalidate_folder(folder);
        Ok(())
    }

    /// Drop cached listings for `folder`.
    ///
    /// Matches the whole `folder=<name>` query pair, so `a` leaves `abc` alone.
    pub fn invalidate_folder(&self, folder: &str) -> usize {
        let pair = encode_query(&[("folder".to_string(), folder.to_string())]);
        self.conditional.clear_where(|key| has_query_pair(key, &pair))
    }

    /// Drop cached per-image responses for `id`.
    pub fn invalidate_image(&self, id: &str) -> usize {
        self.conditional.clear(Some(&format!("/images/{id}/")))
            + self.conditional.clear(Some(&format!("/images/{id}?")))
    }

    /// Call after images were uploaded into `folder`.
    pub fn on_uploaded(&self, folder: &str) -> usize {
        let removed = self.invalidate_folder(folder);
        tracing::debug!("upload to {}: invalidated {} listings", folder, removed);
        removed
    }

    /// Call after image `id` was reprocessed; its metadata and variants changed.
    pub fn on_processed(&self, id: &str) -> usize {
        let removed = self.invalidate_image(id);
        tracing::debug!("processed {}: invalidated {} responses", id, removed);
        removed
    }
}

/// Whether the query part of a request key contains exactly `pair`.
fn has_query_pair(key: &str, pair: &str) -> bool {
    key.split_once('?')
        .is_some_and(|(_, query)| query.split('&').any(|candidate| candidate == pair))
}

impl Drop for GalleryClient {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use gallery_core::BlobStore;

    use crate::blobs::{BlobFetcher, FetchedBlob};

    #[derive(Debug)]
    struct NoFetch;

    #[async_trait]
    impl BlobFetcher for NoFetch {
        async fn fetch(&self, _url: &str) -> Result<FetchedBlob, Error> {
            Err(Error::HttpError("offline".into()))
        }
    }

    fn client() -> GalleryClient {
        let validators = Arc::new(ValidatorStore::in_memory(Duration::hours(24)));
        let blobs = BlobCache::new(Arc::new(BlobStore::new(10, Duration::minutes(30))), Arc::new(NoFetch));
        GalleryClient::new(AppConfig::default(), validators, blobs).unwrap()
    }

    #[tokio::test]
    async fn test_invalidate_folder_uses_encoded_name() {
        let client = client();
        client.validators().set("GET /gallery?folder=my+trip&page=1&pageSize=20", "a");
        client.validators().set("GET /gallery?folder=general&page=1&pageSize=20", "b");

        assert_eq!(client.invalidate_folder("my trip"), 1);
        assert_eq!(client.validators().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_folder_matches_whole_name() {
        let client = client();
        client.validators().set("GET /gallery?folder=a&page=1&pageSize=20", "a");
        client.validators().set("GET /gallery?folder=abc&page=1&pageSize=20", "abc");
        client.validators().set("GET /images/7/metadata?folder=a", "m");
        client.validators().set("GET /images/8/metadata?folder=ab", "n");

        assert_eq!(client.invalidate_folder("a"), 2);
        assert!(client.validators().get("GET /gallery?folder=abc&page=1&pageSize=20").is_some());
        assert!(client.validators().get("GET /images/8/metadata?folder=ab").is_some());
    }

    #[test]
    fn test_has_query_pair() {
        assert!(has_query_pair("GET /gallery?folder=a&page=1", "folder=a"));
        assert!(has_query_pair("GET /images/1/metadata?folder=a", "folder=a"));
        assert!(!has_query_pair("GET /gallery?folder=ab&page=1", "folder=a"));
        assert!(!has_query_pair("GET /folder=a", "folder=a"));
    }

    #[tokio::test]
    async fn test_upload_and_process_hooks() {
        let client = client();
        client.validators().set("GET /gallery?folder=general&page=1&pageSize=20", "g");
        client.validators().set("GET /gallery?folder=other&page=1&pageSize=20", "o");
        client.validators().set("GET /images/7/metadata?folder=other", "m");

        assert_eq!(client.on_uploaded("general"), 1);
        assert_eq!(client.on_processed("7"), 1);

        let keys: Vec<String> = client.validators().snapshot().into_keys().collect();
        assert_eq!(keys, vec!["GET /gallery?folder=other&page=1&pageSize=20"]);
    }

    #[tokio::test]
    async fn test_invalidate_image_matches_whole_id() {
        let client = client();
        client.validators().set("GET /images/7/metadata?folder=general", "a");
        client.validators().set("GET /images/70/metadata?folder=general", "b");

        assert_eq!(client.invalidate_image("7"), 1);
        assert!(client.validators().get("GET /images/70/metadata?folder=general").is_some());
    }

    #[tokio::test]
    async fn test_clear_cache_all() {
        let client = client();
        client.validators().set("GET /gallery", "a");
        client.blobs().store().insert("u", bytes::Bytes::from_static(b"x"), None);

        client.clear_cache(None);

        assert!(client.validators().is_empty());
        assert!(client.blobs().is_empty());
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let config = AppConfig { api_base_url: "ftp://nope".into(), ..AppConfig::default() };
        let validators = Arc::new(ValidatorStore::in_memory(Duration::hours(24)));
        let blobs = BlobCache::new(Arc::new(BlobStore::new(10, Duration::minutes(30))), Arc::new(NoFetch));
        assert!(matches!(GalleryClient::new(config, validators, blobs), Err(Error::InvalidUrl(_))));
    }
}
