use std::collections::VecDeque;

use ahash::AHashSet;
use scenario_schema::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::region::Region;

/// Extent of the area handed to [`build_grid`].
///
/// `width` and `height` are the full extents of the area the caller wants
/// populated. The builder admits region centres out to `center ± width`
/// (and `± height`), so the accepted lattice overhangs the requested area by
/// half its size on every side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaShape {
    pub width: f64,
    pub height: f64,
}

impl AreaShape {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Axis-aligned extent of a polygon. `None` for an empty polygon.
    pub fn bounding(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
        for point in &points[1..] {
            min_x = min_x.min(point.x);
            max_x = max_x.max(point.x);
            min_y = min_y.min(point.y);
            max_y = max_y.max(point.y);
        }
        Some(Self::new(max_x - min_x, max_y - min_y))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("area extents must be positive and finite, got {width} x {height}")]
    InvalidArea { width: f64, height: f64 },
    #[error("grid stride must be positive and finite, got {0}")]
    InvalidStride(f64),
    #[error("region size must be positive and finite, got {0}")]
    InvalidRegionSize(f64),
}

const DIAGONAL_STEPS: [(i64, i64); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

/// Cover an area with overlapping square regions.
///
/// Breadth-first flood fill from `center` over the diagonal lattice
/// `center + (i, j) * stride` with `i + j` even. A lattice point is accepted
/// when it lies strictly inside the bound; accepted points enqueue their four
/// diagonal neighbours. Lattice indices are integers, so centres are never
/// duplicated by floating point drift.
///
/// The requested area (`center ± extent / 2`) is fully covered whenever
/// `stride <= region_size / 2`.
pub fn build_grid(
    area: AreaShape,
    center: Point,
    stride: f64,
    region_size: f64,
) -> Result<Vec<Region>, GridError> {
    let valid = |value: f64| value.is_finite() && value > 0.0;
    if !valid(area.width) || !valid(area.height) {
        return Err(GridError::InvalidArea {
            width: area.width,
            height: area.height,
        });
    }
    if !valid(stride) {
        return Err(GridError::InvalidStride(stride));
    }
    if !valid(region_size) {
        return Err(GridError::InvalidRegionSize(region_size));
    }

    let inside = |(i, j): (i64, i64)| {
        (i as f64 * stride).abs() < area.width && (j as f64 * stride).abs() < area.height
    };

    let mut queue = VecDeque::new();
    let mut seen = AHashSet::new();
    let mut accepted = Vec::new();
    queue.push_back((0i64, 0i64));
    seen.insert((0i64, 0i64));

    while let Some(cell) = queue.pop_front() {
        if !inside(cell) {
            continue;
        }
        accepted.push(cell);
        for (di, dj) in DIAGONAL_STEPS {
            let next = (cell.0 + di, cell.1 + dj);
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }

    tracing::debug!(
        target: "large_init::grid",
        width = area.width,
        height = area.height,
        stride,
        regions = accepted.len(),
        "grid.built"
    );

    Ok(accepted
        .into_iter()
        .map(|(i, j)| {
            Region::square(
                center.offset(i as f64 * stride, j as f64 * stride),
                region_size,
            )
        })
        .collect())
}
