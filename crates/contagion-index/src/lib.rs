//! Spatial indexing abstractions for per-tick neighborhood queries.
//!
//! Indices are rebuilt from scratch every tick from a dense slice of
//! positions; callers keep their own per-slot metadata and receive slot
//! numbers back from queries.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod quadtree;

pub use quadtree::QuadTreeIndex;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// A point carried a NaN or infinite coordinate.
    #[error("point {slot} has a non-finite coordinate ({x}, {y})")]
    NonFinitePosition { slot: usize, x: f32, y: f32 },
    /// More points were supplied than the index can address.
    #[error("cannot index {0} points; slot numbers are limited to u32")]
    TooManyPoints(usize),
}

/// Axis-aligned rectangle with inclusive edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Square of half-width `radius` centred on `(x, y)`.
    #[must_use]
    pub fn around(x: f32, y: f32, radius: f32) -> Self {
        Self::new(x - radius, y - radius, x + radius, y + radius)
    }

    /// Smallest box enclosing every point, or `None` for an empty slice.
    #[must_use]
    pub fn enclosing(points: &[(f32, f32)]) -> Option<Self> {
        let (&(x0, y0), rest) = points.split_first()?;
        let mut bounds = Self::new(x0, y0, x0, y0);
        for &(x, y) in rest {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        Some(bounds)
    }

    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex: Send + Sync {
    /// Rebuild internal structures from point positions; slot `i` refers to `positions[i]`.
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError>;

    /// Visit every slot whose point lies inside `bbox` (edges inclusive).
    fn query_bbox(&self, bbox: &BoundingBox, visitor: &mut dyn FnMut(usize));

    /// Number of points indexed by the last rebuild.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position stored for `slot` by the last rebuild.
    fn position(&self, slot: usize) -> Option<(f32, f32)>;

    /// Visit slots within `radius` of `origin` (inclusive) with their squared distance.
    ///
    /// The bounding-box query is refined by exact distance, so only points
    /// inside the disc are reported.
    fn neighbors_within(
        &self,
        origin: (f32, f32),
        radius: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let radius_sq = radius * radius;
        let bbox = BoundingBox::around(origin.0, origin.1, radius);
        self.query_bbox(&bbox, &mut |slot| {
            if let Some((x, y)) = self.position(slot) {
                let dx = x - origin.0;
                let dy = y - origin.1;
                let dist_sq = dx * dx + dy * dy;
                if dist_sq <= radius_sq {
                    visitor(slot, OrderedFloat(dist_sq));
                }
            }
        });
    }
}

/// Selects which index implementation backs neighbor queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Quadtree,
    /// Exhaustive pairwise scan; quadratic per tick but trivially correct.
    LinearScan,
}

impl IndexKind {
    /// Construct an empty index of this kind.
    #[must_use]
    pub fn build(self) -> Box<dyn NeighborhoodIndex> {
        match self {
            Self::Quadtree => Box::new(QuadTreeIndex::new()),
            Self::LinearScan => Box::new(LinearScanIndex::new()),
        }
    }
}

pub(crate) fn validate_positions(positions: &[(f32, f32)]) -> Result<(), IndexError> {
    if u32::try_from(positions.len()).is_err() {
        return Err(IndexError::TooManyPoints(positions.len()));
    }
    if let Some((slot, &(x, y))) = positions
        .iter()
        .enumerate()
        .find(|(_, (x, y))| !x.is_finite() || !y.is_finite())
    {
        return Err(IndexError::NonFinitePosition { slot, x, y });
    }
    Ok(())
}

/// Baseline index that checks every point on each query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearScanIndex {
    positions: Vec<(f32, f32)>,
}

impl LinearScanIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NeighborhoodIndex for LinearScanIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        validate_positions(positions)?;
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        Ok(())
    }

    fn query_bbox(&self, bbox: &BoundingBox, visitor: &mut dyn FnMut(usize)) {
        for (slot, &(x, y)) in self.positions.iter().enumerate() {
            if bbox.contains(x, y) {
                visitor(slot);
            }
        }
    }

    fn len(&self) -> usize {
        self.positions.len()
    }

    fn position(&self, slot: usize) -> Option<(f32, f32)> {
        self.positions.get(slot).copied()
    }
}
