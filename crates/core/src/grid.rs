//! Virtualized grid geometry.
//!
//! Given an item count, a column count, cell dimensions and the container's
//! size, [`GridGeometry`] works out which rows and columns have to be
//! materialized for a scroll offset. Every call recomputes from scratch in
//! constant time; nothing depends on the item count beyond a division.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::lazy::Rect;

/// Default number of extra rows/columns kept around the visible area.
pub const DEFAULT_OVERSCAN: usize = 2;

/// Thumbnail size preset. Smaller thumbnails mean more, narrower columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl ThumbnailSize {
    /// Cell edge length in pixels.
    pub fn item_size(self) -> f64 {
        match self {
            Self::Small => 180.0,
            Self::Medium => 240.0,
            Self::Large => 320.0,
        }
    }

    pub fn columns(self) -> usize {
        match self {
            Self::Small => 6,
            Self::Medium => 4,
            Self::Large => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollOffset {
    pub top: f64,
    pub left: f64,
}

impl ScrollOffset {
    pub fn new(top: f64, left: f64) -> Self {
        Self { top, left }
    }

    pub fn vertical(top: f64) -> Self {
        Self { top, left: 0.0 }
    }
}

/// Inclusive row/column bounds of the materialized part of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewportWindow {
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
}

impl ViewportWindow {
    pub fn rows(&self) -> RangeInclusive<usize> {
        self.start_row..=self.end_row
    }

    pub fn cols(&self) -> RangeInclusive<usize> {
        self.start_col..=self.end_col
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows().contains(&row) && self.cols().contains(&col)
    }

    /// Number of cells inside the window, placeholders included.
    pub fn cell_count(&self) -> usize {
        (self.end_row - self.start_row + 1) * (self.end_col - self.start_col + 1)
    }
}

/// A materialized grid cell.
///
/// `item` is `None` for placeholder positions past the last item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
    pub index: usize,
    pub item: Option<usize>,
    pub rect: Rect,
}

impl GridCell {
    pub fn is_placeholder(&self) -> bool {
        self.item.is_none()
    }
}

/// Layout of a fixed-cell grid inside a scrolling container.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    item_count: usize,
    columns: usize,
    column_width: f64,
    row_height: f64,
    container: Size,
    overscan: usize,
}

impl GridGeometry {
    pub fn new(item_count: usize, columns: usize, column_width: f64, row_height: f64, container: Size) -> Self {
        debug_assert!(columns > 0, "grid needs at least one column");
        Self { item_count, columns: columns.max(1), column_width, row_height, container, overscan: DEFAULT_OVERSCAN }
    }

    /// Layout for a thumbnail preset: the container width is shared evenly
    /// between the preset's columns and rows are one thumbnail tall.
    pub fn for_thumbnails(item_count: usize, size: ThumbnailSize, container: Size) -> Self {
        let columns = size.columns();
        Self::new(item_count, columns, container.width / columns as f64, size.item_size(), container)
    }

    pub fn with_overscan(mut self, overscan: usize) -> Self {
        self.overscan = overscan;
        self
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn container(&self) -> Size {
        self.container
    }

    /// `ceil(item_count / columns)`.
    pub fn row_count(&self) -> usize {
        self.item_count.div_ceil(self.columns)
    }

    /// Total scrollable size of the grid content.
    pub fn content_size(&self) -> Size {
        Size::new(self.columns as f64 * self.column_width, self.row_count() as f64 * self.row_height)
    }

    pub fn resize(&mut self, container: Size) {
        self.container = container;
    }

    /// Relayout a thumbnail grid for a new container size.
    pub fn resize_for_thumbnails(&mut self, size: ThumbnailSize, container: Size) {
        *self = Self::for_thumbnails(self.item_count, size, container).with_overscan(self.overscan);
    }

    fn is_degenerate(&self) -> bool {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        self.item_count == 0 || !valid(self.row_height) || !valid(self.column_width)
    }

    /// Rows and columns strictly intersecting the container, without overscan.
    ///
    /// Returns `None` for an empty or degenerate grid.
    pub fn visible(&self, scroll: ScrollOffset) -> Option<ViewportWindow> {
        if self.is_degenerate() {
            return None;
        }
        let (start_row, end_row) = span(scroll.top, self.container.height, self.row_height, self.row_count());
        let (start_col, end_col) = span(scroll.left, self.container.width, self.column_width, self.columns);
        Some(ViewportWindow { start_row, end_row, start_col, end_col })
    }

    /// The visible window expanded by the overscan and clamped to the grid.
    pub fn window(&self, scroll: ScrollOffset) -> Option<ViewportWindow> {
        let visible = self.visible(scroll)?;
        let window = ViewportWindow {
            start_row: visible.start_row.saturating_sub(self.overscan),
            end_row: visible.end_row.saturating_add(self.overscan).min(self.row_count() - 1),
            start_col: visible.start_col.saturating_sub(self.overscan),
            end_col: visible.end_col.saturating_add(self.overscan).min(self.columns - 1),
        };
        debug_assert!(window.start_row <= window.end_row && window.start_col <= window.end_col);
        Some(window)
    }

    /// Construct the cells inside `window` and nothing else.
    pub fn cells(&self, window: &ViewportWindow) -> Vec<GridCell> {
        let mut cells = Vec::with_capacity(window.cell_count());
        for row in window.rows() {
            for col in window.cols() {
                let index = self.index_of(row, col);
                cells.push(GridCell {
                    row,
                    col,
                    index,
                    item: (index < self.item_count).then_some(index),
                    rect: self.cell_rect(row, col),
                });
            }
        }
        cells
    }

    pub fn index_of(&self, row: usize, col: usize) -> usize {
        row * self.columns + col
    }

    pub fn position_of(&self, index: usize) -> (usize, usize) {
        (index / self.columns, index % self.columns)
    }

    /// Cell bounds in content coordinates.
    pub fn cell_rect(&self, row: usize, col: usize) -> Rect {
        Rect::new(col as f64 * self.column_width, row as f64 * self.row_height, self.column_width, self.row_height)
    }

    /// The container's bounds in content coordinates.
    pub fn viewport_rect(&self, scroll: ScrollOffset) -> Rect {
        Rect::new(scroll.left.max(0.0), scroll.top.max(0.0), self.container.width, self.container.height)
    }

    /// Highest item index that is visible, if any item is.
    pub fn last_visible_index(&self, scroll: ScrollOffset) -> Option<usize> {
        let visible = self.visible(scroll)?;
        (visible.start_row..=visible.end_row)
            .rev()
            .flat_map(|row| (visible.start_col..=visible.end_col).rev().map(move |col| (row, col)))
            .map(|(row, col)| self.index_of(row, col))
            .find(|&index| index < self.item_count)
    }
}

/// First and last track (row or column) intersecting `[offset, offset + extent)`.
fn span(offset: f64, extent: f64, track: f64, count: usize) -> (usize, usize) {
    let last_track = count.saturating_sub(1);
    let offset = if offset.is_finite() { offset.max(0.0) } else { 0.0 };
    let extent = if extent.is_finite() { extent.max(0.0) } else { 0.0 };

    let first = ((offset / track).floor() as usize).min(last_track);
    let end = ((offset + extent) / track).ceil() as usize;
    let last = end.saturating_sub(1).clamp(first, last_track);
    (first, last)
}
