//! Viewport lazy-load state machine.
//!
//! Each observed cell moves `Unobserved -> Pending -> Intersecting`, and in
//! trigger-once mode the first intersection is terminal (`Triggered`). The
//! loader is fed rectangles rather than callbacks, so the host decides when
//! to re-evaluate (on scroll, resize or new cells).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Axis-aligned rectangle in content pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn expand(&self, margin: f64) -> Self {
        Self::new(self.x - margin, self.y - margin, self.width + 2.0 * margin, self.height + 2.0 * margin)
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| Rect::new(x, y, right - x, bottom - y))
    }

    /// Fraction of `self` inside `root`, in `0.0..=1.0`.
    pub fn visible_fraction(&self, root: &Rect) -> f64 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        self.intersection(root).map_or(0.0, |overlap| (overlap.area() / area).min(1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LazyLoadConfig {
    /// Minimum visible fraction that counts as intersecting.
    pub threshold: f64,
    /// Pixels added around the root before testing intersection.
    pub root_margin: f64,
    pub trigger_once: bool,
}

impl Default for LazyLoadConfig {
    fn default() -> Self {
        Self { threshold: 0.1, root_margin: 100.0, trigger_once: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellState {
    Unobserved,
    Pending,
    Intersecting,
    Triggered,
}

/// A visibility change produced by [`LazyLoader::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityEvent<K> {
    pub key: K,
    pub intersecting: bool,
    /// True only for the first time this cell became intersecting.
    pub first: bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: CellState,
    fired: bool,
}

/// Per-grid lazy-load tracker keyed by cell identity.
#[derive(Debug, Clone)]
pub struct LazyLoader<K> {
    config: LazyLoadConfig,
    cells: HashMap<K, Entry>,
}

impl<K: Eq + Hash + Clone> LazyLoader<K> {
    pub fn new(config: LazyLoadConfig) -> Self {
        Self { config, cells: HashMap::new() }
    }

    pub fn config(&self) -> &LazyLoadConfig {
        &self.config
    }

    /// Start tracking a cell. Observing an already tracked cell is a no-op.
    pub fn observe(&mut self, key: K) {
        self.cells.entry(key).or_insert(Entry { state: CellState::Pending, fired: false });
    }

    /// Stop tracking a cell and forget its state.
    pub fn unobserve(&mut self, key: &K) {
        self.cells.remove(key);
    }

    pub fn state(&self, key: &K) -> CellState {
        self.cells.get(key).map_or(CellState::Unobserved, |entry| entry.state)
    }

    pub fn observed(&self) -> usize {
        self.cells.len()
    }

    /// Drop every cell not accepted by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.cells.retain(|key, _| keep(key));
    }

    /// Re-evaluate the given cells against `root`.
    ///
    /// Cells that are not observed are ignored; triggered cells never change.
    pub fn update<I>(&mut self, root: Rect, cells: I) -> Vec<VisibilityEvent<K>>
    where
        I: IntoIterator<Item = (K, Rect)>,
    {
        let root = root.expand(self.config.root_margin);
        let mut events = Vec::new();

        for (key, rect) in cells {
            let Some(entry) = self.cells.get_mut(&key) else {
                continue;
            };
            let fraction = rect.visible_fraction(&root);
            let intersecting = fraction > 0.0 && fraction >= self.config.threshold;

            match (entry.state, intersecting) {
                (CellState::Pending, true) => {
                    let first = !entry.fired;
                    entry.fired = true;
                    entry.state = if self.config.trigger_once { CellState::Triggered } else { CellState::Intersecting };
                    events.push(VisibilityEvent { key, intersecting: true, first });
                }
                (CellState::Intersecting, false) => {
                    entry.state = CellState::Pending;
                    events.push(VisibilityEvent { key, intersecting: false, first: false });
                }
                _ => {}
            }
        }

        events
    }
}

impl<K: Eq + Hash + Clone> Default for LazyLoader<K> {
    fn default() -> Self {
        Self::new(LazyLoadConfig::default())
    }
}
