use std::sync::Arc;

use chrono::Duration;
use gallery_client::fetch::parse_base;
use gallery_client::{BlobCache, FetchClient, FetchConfig, FetchOutcome, GalleryClient, HttpBlobFetcher, ImageSource};
use gallery_core::{AppConfig, Error, MemoryPersistence, SystemClock, ThumbnailSize, ValidatorStore};
use httpmock::prelude::*;
use tracing_subscriber::EnvFilter;

const PAGE_KEY: &str = "GET /gallery?folder=general&page=1&pageSize=20";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn listing_body(count: usize) -> String {
    let images: Vec<String> = (0..count).map(|n| format!("http://media.test/images/img-{n}")).collect();
    serde_json::json!({
        "images": images,
        "page": 1,
        "pageSize": 20,
        "totalItems": 45,
        "totalPages": 3,
        "hasMore": true
    })
    .to_string()
}

fn client_with(server: &MockServer, validators: Arc<ValidatorStore>) -> GalleryClient {
    let config = AppConfig { api_base_url: server.url("/api"), ..AppConfig::default() };
    let fetch = FetchClient::new(FetchConfig::from(&config)).unwrap();
    let base = parse_base(&config.api_base_url).unwrap();
    let blobs = BlobCache::from_config(&config, Arc::new(HttpBlobFetcher::new(fetch, base)));
    GalleryClient::new(config, validators, blobs).unwrap()
}

fn client(server: &MockServer) -> GalleryClient {
    client_with(server, Arc::new(ValidatorStore::in_memory(Duration::hours(24))))
}

#[tokio::test]
async fn unchanged_listing_replays_previous_items() {
    init_tracing();
    let server = MockServer::start_async().await;

    let fresh = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/gallery")
                .query_param("folder", "general")
                .query_param("page", "1")
                .query_param("pageSize", "20")
                .header_missing("if-none-match");
            then.status(200)
                .header("content-type", "application/json")
                .header("etag", "\"v1\"")
                .body(listing_body(20));
        })
        .await;
    let not_modified = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery").header("if-none-match", "\"v1\"");
            then.status(304).header("etag", "\"v1\"");
        })
        .await;

    let client = client(&server);

    let first = client.fetch_page("general", 1, 20, ThumbnailSize::Medium).await.unwrap();
    assert!(!first.is_unchanged());
    assert_eq!(first.get().items.len(), 20);
    assert_eq!(client.validators().get(PAGE_KEY).as_deref(), Some("\"v1\""));

    let second = client.fetch_page("general", 1, 20, ThumbnailSize::Medium).await.unwrap();
    assert!(second.is_unchanged());
    assert_eq!(second.get(), first.get());
    assert_eq!(client.validators().get(PAGE_KEY).as_deref(), Some("\"v1\""));

    fresh.assert_calls_async(1).await;
    not_modified.assert_calls_async(1).await;
}

#[tokio::test]
async fn only_changed_outcomes_write_validators() {
    init_tracing();
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery").header_missing("if-none-match");
            then.status(200).header("etag", "\"v1\"").body(listing_body(20));
        })
        .await;
    let not_modified = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery").header("if-none-match", "\"v1\"");
            then.status(304);
        })
        .await;

    let persistence = Arc::new(MemoryPersistence::new());
    let validators = Arc::new(ValidatorStore::open(persistence.clone(), Duration::hours(24), Arc::new(SystemClock)).await);
    let client = client_with(&server, Arc::clone(&validators));

    client.get_page("general", 1, 20, ThumbnailSize::Medium).await.unwrap();
    validators.flush().await;
    assert_eq!(persistence.save_count(), 1);

    let outcome = client.fetch_page("general", 1, 20, ThumbnailSize::Medium).await.unwrap();
    assert!(outcome.is_unchanged());
    validators.flush().await;
    assert_eq!(persistence.save_count(), 1);

    not_modified.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery").header("if-none-match", "\"v1\"");
            then.status(503).header("etag", "\"v2\"");
        })
        .await;

    let err = client.get_page("general", 1, 20, ThumbnailSize::Medium).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus(503)));
    validators.flush().await;
    assert_eq!(persistence.save_count(), 1);
    assert_eq!(validators.get(PAGE_KEY).as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn late_response_from_older_request_does_not_win() {
    init_tracing();
    let server = MockServer::start_async().await;

    let slow = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery");
            then.status(200)
                .header("etag", "\"old\"")
                .body(listing_body(1))
                .delay(std::time::Duration::from_millis(800));
        })
        .await;

    let client = Arc::new(client(&server));
    let older = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.fetch_page("general", 1, 20, ThumbnailSize::Medium).await }
    });

    while slow.calls_async().await == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    slow.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery");
            then.status(200).header("etag", "\"new\"").body(listing_body(2));
        })
        .await;

    let newer = client.fetch_page("general", 1, 20, ThumbnailSize::Medium).await.unwrap();
    assert_eq!(newer.get().items.len(), 2);
    assert_eq!(client.validators().get(PAGE_KEY).as_deref(), Some("\"new\""));

    let older = older.await.unwrap().unwrap();
    assert_eq!(older.get().items.len(), 1, "the older caller still gets its own response");
    assert_eq!(client.validators().get(PAGE_KEY).as_deref(), Some("\"new\""));
}

#[tokio::test]
async fn page_fields_come_from_listing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery");
            then.status(200).header("etag", "\"p\"").body(listing_body(3));
        })
        .await;

    let page = client(&server)
        .get_page("general", 1, 20, ThumbnailSize::Small)
        .await
        .unwrap();

    assert_eq!(page.total_count, 45);
    assert_eq!(page.total_pages, 3);
    assert!(page.has_more);
    assert_eq!(page.items[2].id, "img-2");
    assert_eq!(page.items[2].thumbnail_url, "http://media.test/images/img-2?w=180&h=180");
}

#[tokio::test]
async fn not_modified_without_retained_payload_refetches() {
    init_tracing();
    let server = MockServer::start_async().await;

    let conditional = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery").header("if-none-match", "\"v1\"");
            then.status(304);
        })
        .await;
    let unconditional = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery").header_missing("if-none-match");
            then.status(200).header("etag", "\"v2\"").body(listing_body(20));
        })
        .await;

    // validators survive a restart, retained payloads do not
    let raw = format!(
        r#"{{"{PAGE_KEY}":{{"validator":"\"v1\"","storedAt":{}}}}}"#,
        chrono::Utc::now().timestamp_millis()
    );
    let validators = ValidatorStore::open(
        Arc::new(MemoryPersistence::with_raw(raw)),
        Duration::hours(24),
        Arc::new(SystemClock),
    )
    .await;
    assert_eq!(validators.get(PAGE_KEY).as_deref(), Some("\"v1\""));

    let client = client_with(&server, Arc::new(validators));
    let outcome = client.fetch_page("general", 1, 20, ThumbnailSize::Medium).await.unwrap();

    assert!(matches!(outcome, FetchOutcome::Changed(ref page) if page.items.len() == 20));
    assert_eq!(client.validators().get(PAGE_KEY).as_deref(), Some("\"v2\""));
    conditional.assert_calls_async(1).await;
    unconditional.assert_calls_async(1).await;
}

#[tokio::test]
async fn failures_never_write_validators() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery").query_param("folder", "broken");
            then.status(503).header("etag", "\"nope\"");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery").query_param("folder", "garbled");
            then.status(200).header("etag", "\"bad\"").body("{not json");
        })
        .await;

    let client = client(&server);

    let err = client.get_page("broken", 1, 20, ThumbnailSize::Medium).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus(503)));
    assert!(err.is_retryable());

    let err = client.get_page("garbled", 1, 20, ThumbnailSize::Medium).await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)));

    assert!(client.validators().is_empty());
}

#[tokio::test]
async fn delete_invalidates_image_and_folder() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/gallery");
            then.status(200).header("etag", "\"list\"").body(listing_body(2));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/images/img-1/metadata");
            then.status(200).header("etag", "\"meta\"").body(
                r#"{"id":"img-1","fileName":"a.png","contentType":"image/png","fileSize":10,"width":1,"height":1,
                    "folder":"general","createdAt":"2024-01-01","modifiedAt":"2024-01-01","eTag":"\"meta\""}"#,
            );
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/api/images/img-1").query_param("folder", "general");
            then.status(204);
        })
        .await;

    let client = client(&server);
    client.get_page("general", 1, 20, ThumbnailSize::Medium).await.unwrap();
    let metadata = client.get_image_metadata("img-1", "general").await.unwrap();
    assert_eq!(metadata.file_name, "a.png");
    assert_eq!(client.validators().len(), 2);

    client.delete_image("img-1", "general").await.unwrap();

    delete.assert_async().await;
    assert!(client.validators().is_empty());
}

#[tokio::test]
async fn blobs_are_fetched_once_and_fall_back_on_error() {
    let server = MockServer::start_async().await;
    let image = server
        .mock_async(|when, then| {
            when.method(GET).path("/images/1");
            then.status(200).header("content-type", "image/png").body(vec![0x89, b'P', b'N', b'G']);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/images/missing");
            then.status(404);
        })
        .await;

    let client = client(&server);
    let url = server.url("/images/1");

    let first = client.resolve_image(&url).await;
    let second = client.resolve_image(&url).await;
    let ImageSource::Local(handle) = &first else {
        panic!("expected local image, got {first:?}");
    };
    assert_eq!(handle.content_type(), Some("image/png"));
    assert_eq!(first, second);
    image.assert_calls_async(1).await;

    let missing = server.url("/images/missing");
    assert_eq!(client.resolve_image(&missing).await, ImageSource::Remote(missing.clone()));
}
