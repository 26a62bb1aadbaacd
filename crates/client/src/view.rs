//! Per-grid view state.
//!
//! A [`GridView`] owns one grid's geometry and lazy-load tracker. On every
//! scroll or resize it recomputes the window, materializes only the cells
//! inside it, resolves images for cells that become visible for the first
//! time and prefetches around the last visible item. Unmounting cancels the
//! view's token: nothing new is started, but fetches already running finish
//! and land in the shared blob cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

use gallery_core::{
    AppConfig, GalleryItem, GridCell, GridGeometry, LazyLoader, ScrollOffset, Size, ThumbnailSize, ViewportWindow,
};

use crate::blobs::{BlobCache, ImageSource, window_urls};

/// Cooperative cancellation flag shared between a view and its tasks.
///
/// Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

type Images = Arc<Mutex<HashMap<usize, ImageSource>>>;

/// Virtualized, lazily loaded view over a list of gallery items.
#[derive(Debug)]
pub struct GridView {
    items: Arc<[GalleryItem]>,
    thumbnail: ThumbnailSize,
    geometry: GridGeometry,
    loader: LazyLoader<usize>,
    scroll: ScrollOffset,
    window: Option<ViewportWindow>,
    cells: Vec<GridCell>,
    images: Images,
    blobs: BlobCache,
    preload_window: usize,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl GridView {
    pub fn new(
        items: Vec<GalleryItem>, thumbnail: ThumbnailSize, container: Size, blobs: BlobCache, config: &AppConfig,
    ) -> Self {
        let geometry = GridGeometry::for_thumbnails(items.len(), thumbnail, container).with_overscan(config.overscan);
        Self {
            items: items.into(),
            thumbnail,
            geometry,
            loader: LazyLoader::new(config.lazy_load()),
            scroll: ScrollOffset::default(),
            window: None,
            cells: Vec::new(),
            images: Arc::new(Mutex::new(HashMap::new())),
            blobs,
            preload_window: config.preload_window,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn items(&self) -> &[GalleryItem] {
        &self.items
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn window(&self) -> Option<ViewportWindow> {
        self.window
    }

    /// Cells currently materialized.
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_mounted(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Image for item `index`, once its resolve has finished.
    pub fn image(&self, index: usize) -> Option<ImageSource> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner).get(&index).cloned()
    }

    pub fn scroll_to(&mut self, offset: ScrollOffset) -> &[GridCell] {
        self.scroll = offset;
        self.refresh();
        &self.cells
    }

    pub fn resize(&mut self, container: Size) -> &[GridCell] {
        self.geometry.resize_for_thumbnails(self.thumbnail, container);
        self.refresh();
        &self.cells
    }

    fn refresh(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }

        let Some(window) = self.geometry.window(self.scroll) else {
            self.window = None;
            self.cells.clear();
            self.loader.retain(|_| false);
            return;
        };

        self.cells = self.geometry.cells(&window);
        self.window = Some(window);

        let geometry = &self.geometry;
        self.loader.retain(|&index| {
            let (row, col) = geometry.position_of(index);
            window.contains(row, col)
        });
        for index in self.cells.iter().filter_map(|cell| cell.item) {
            self.loader.observe(index);
        }

        let root = self.geometry.viewport_rect(self.scroll);
        let observed = self.cells.iter().filter_map(|cell| cell.item.map(|index| (index, cell.rect)));
        let events = self.loader.update(root, observed);

        for event in events.into_iter().filter(|event| event.first) {
            self.resolve(event.key);
        }

        if let Some(last) = self.geometry.last_visible_index(self.scroll) {
            self.prefetch(last);
        }
    }

    fn resolve(&mut self, index: usize) {
        let Some(item) = self.items.get(index) else {
            return;
        };
        let url = item.thumbnail_url.clone();
        let blobs = self.blobs.clone();
        let images = Arc::clone(&self.images);
        let cancel = self.cancel.clone();

        self.spawn(async move {
            let source = blobs.resolve(&url).await;
            if !cancel.is_cancelled() {
                images.lock().unwrap_or_else(PoisonError::into_inner).insert(index, source);
            }
        });
    }

    fn prefetch(&mut self, center: usize) {
        if self.preload_window == 0 {
            return;
        }
        for url in window_urls(&self.items, center, self.preload_window) {
            if !self.blobs.contains(&url) {
                self.blobs.preload(&url);
            }
        }
    }

    fn spawn(&mut self, work: impl std::future::Future<Output = ()> + Send + 'static) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime, grid view work skipped");
            return;
        };
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(runtime.spawn(work));
    }

    /// Wait for the resolves this view has started.
    pub async fn settle(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!("grid view task failed: {}", e);
            }
        }
    }

    /// Stop originating work. In-flight fetches keep running.
    pub fn unmount(&mut self) {
        self.cancel.cancel();
        self.loader.retain(|_| false);
        self.tasks.clear();
        self.window = None;
        self.cells.clear();
    }
}

impl Drop for GridView {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
