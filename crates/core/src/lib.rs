//! Core types and shared functionality for the gallery media cache.
//!
//! This crate provides:
//! - Canonical cache keys for API requests
//! - Validator (ETag) store with SQLite-backed persistence
//! - Bounded FIFO blob store for fetched media
//! - Virtualized grid geometry and viewport lazy-load state
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod grid;
pub mod lazy;
pub mod model;

pub use cache::{
    BlobHandle, BlobStore, CacheDb, CacheKey, MemoryPersistence, NoPersistence, SqlitePersistence, ValidatorPersistence,
    ValidatorRecord, ValidatorStore, cache_key, canonical_params,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use grid::{GridCell, GridGeometry, ScrollOffset, Size, ThumbnailSize, ViewportWindow};
pub use lazy::{CellState, LazyLoadConfig, LazyLoader, Rect, VisibilityEvent};
pub use model::{GalleryItem, GalleryPage, GalleryQuery, GalleryResponse, ImageMetadata, ImageQuery};
