//! Async edge of the gallery media cache.
//!
//! This crate provides the HTTP transport, conditional (ETag) requests,
//! the shared blob cache with in-flight de-duplication, the gallery API
//! facade and per-grid view state built on `gallery-core`.

pub mod blobs;
pub mod conditional;
pub mod fetch;
pub mod gallery;
pub mod view;

pub use blobs::{BlobCache, BlobFetcher, FetchedBlob, HttpBlobFetcher, ImageSource, PreloadReport};
pub use conditional::{ApiRequest, ConditionalClient, FetchOutcome};
pub use fetch::{FetchClient, FetchConfig, FetchResponse};
pub use gallery::{GALLERY_PATH, GalleryClient};
pub use view::{CancellationToken, GridView};
