//! Gallery API data types.
//!
//! Query structs are the typed parameter objects for each endpoint; they
//! serialize (camelCase, `None` skipped) into the canonical cache key and
//! the outbound query string.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::grid::ThumbnailSize;

/// Default folder when the caller does not name one.
pub const DEFAULT_FOLDER: &str = "general";

/// Default listing page size.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Parameters for the gallery listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryQuery {
    pub folder: String,
    pub page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl GalleryQuery {
    pub fn new(folder: impl Into<String>, page: u32, page_size: u32) -> Self {
        Self { folder: folder.into(), page, page_size, w: None, h: None, format: None }
    }
}

impl Default for GalleryQuery {
    fn default() -> Self {
        Self::new(DEFAULT_FOLDER, 1, DEFAULT_PAGE_SIZE)
    }
}

/// Parameters for per-image endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageQuery {
    pub folder: String,
}

impl ImageQuery {
    pub fn new(folder: impl Into<String>) -> Self {
        Self { folder: folder.into() }
    }
}

/// Raw listing response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GalleryResponse {
    pub images: Vec<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub total_items: Option<u64>,
    pub total_pages: Option<u32>,
    pub has_more: Option<bool>,
}

/// One image in a gallery page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    pub id: String,
    pub url: String,
    pub thumbnail_url: String,
    pub folder: String,
    pub file_name: String,
}

impl GalleryItem {
    /// Build an item from an image URL returned by the listing endpoint.
    pub fn from_url(url: &str, folder: &str, thumbnail: ThumbnailSize) -> Self {
        let id = image_id_from_url(url).unwrap_or_default().to_string();
        Self {
            file_name: format!("image-{id}"),
            id,
            url: url.to_string(),
            thumbnail_url: thumbnail_url(url, thumbnail),
            folder: folder.to_string(),
        }
    }
}

/// A page of gallery items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPage {
    pub items: Vec<GalleryItem>,
    pub total_count: u64,
    pub total_pages: u32,
    pub current_page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

impl GalleryPage {
    /// Convert a listing response, filling gaps from the query.
    pub fn from_response(response: &GalleryResponse, query: &GalleryQuery, thumbnail: ThumbnailSize) -> Self {
        let items = response
            .images
            .iter()
            .map(|url| GalleryItem::from_url(url, &query.folder, thumbnail))
            .collect();

        Self {
            items,
            total_count: response.total_items.unwrap_or(0),
            total_pages: response.total_pages.unwrap_or(1),
            current_page: response.page.unwrap_or(query.page),
            page_size: response.page_size.unwrap_or(query.page_size),
            has_more: response.has_more.unwrap_or(false),
        }
    }
}

/// Metadata for a single image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub folder: String,
    pub created_at: String,
    pub modified_at: String,
    #[serde(rename = "eTag")]
    pub etag: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// The path segment after `/images/`, up to any query string.
pub fn image_id_from_url(url: &str) -> Option<&str> {
    let start = url.find("/images/")? + "/images/".len();
    let rest = &url[start..];
    let id = rest.split('?').next().unwrap_or(rest);
    if id.is_empty() { None } else { Some(id) }
}

/// Thumbnail URL for `url` at the given size (`w`/`h` query parameters).
pub fn thumbnail_url(url: &str, size: ThumbnailSize) -> String {
    let px = size.item_size() as u32;
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}w={px}&h={px}")
}
