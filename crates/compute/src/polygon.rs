use foundation::math::distinct_vertex_count;
use foundation::{Aabb2, Axis};
use geo::{BooleanOps, BoundingRect, Polygon, Rect, coord};

use crate::error::DegenerateGeometry;
use crate::nodes::total_coordinates;

/// Smallest budget a closed ring can satisfy.
pub const MIN_POLYGON_BUDGET: usize = 4;

/// One emitted polygon with its exterior vertex count.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonPart {
    pub polygon: Polygon<f64>,
    pub nodes: usize,
    /// Produced by at least one split.
    pub split: bool,
}

/// Recursively bisects a polygon along the longer axis of its bounding box
/// until every part is within `max_nodes` coordinates.
///
/// Uses an explicit work stack, so adversarial inputs cannot exhaust the call
/// stack.
#[derive(Debug, Clone, Copy)]
pub struct PolygonSubdivider {
    max_nodes: usize,
}

impl PolygonSubdivider {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            max_nodes: max_nodes.max(MIN_POLYGON_BUDGET),
        }
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Feeds every resulting part to `emit`, in stack order. Parts that
    /// collapse are reported as [`DegenerateGeometry`] instead.
    pub fn subdivide<F>(&self, polygon: Polygon<f64>, mut emit: F)
    where
        F: FnMut(Result<PolygonPart, DegenerateGeometry>),
    {
        let mut stack = vec![(polygon, false)];
        while let Some((poly, split)) = stack.pop() {
            if distinct_vertex_count(&poly.exterior().0) < 3 {
                emit(Err(DegenerateGeometry {
                    reason: "exterior ring has fewer than 3 distinct vertices",
                }));
                continue;
            }

            let coords = total_coordinates(&poly);
            if coords <= self.max_nodes {
                emit(Ok(part(poly, split)));
                continue;
            }

            match bisect(&poly) {
                Bisection::Parts(parts) => {
                    if parts.len() == 1 && total_coordinates(&parts[0]) >= coords {
                        // the cut did not separate anything
                        emit(Ok(part(poly, split)));
                        continue;
                    }
                    stack.extend(parts.into_iter().map(|p| (p, true)));
                }
                Bisection::Minimal => emit(Ok(part(poly, split))),
                Bisection::Empty => emit(Err(DegenerateGeometry {
                    reason: "split produced no parts",
                })),
            }
        }
    }

    /// Convenience wrapper collecting the parts and dropping degenerate ones.
    pub fn subdivide_to_vec(&self, polygon: Polygon<f64>) -> Vec<PolygonPart> {
        let mut out = Vec::new();
        self.subdivide(polygon, |r| {
            if let Ok(p) = r {
                out.push(p);
            }
        });
        out
    }
}

/// Drops holes with fewer than 3 distinct vertices. A degenerate exterior
/// makes the whole polygon degenerate.
pub fn clean_rings(polygon: &Polygon<f64>) -> Result<Polygon<f64>, DegenerateGeometry> {
    if distinct_vertex_count(&polygon.exterior().0) < 3 {
        return Err(DegenerateGeometry {
            reason: "exterior ring has fewer than 3 distinct vertices",
        });
    }
    let holes = polygon
        .interiors()
        .iter()
        .filter(|h| distinct_vertex_count(&h.0) >= 3)
        .cloned()
        .collect();
    Ok(Polygon::new(polygon.exterior().clone(), holes))
}

fn part(polygon: Polygon<f64>, split: bool) -> PolygonPart {
    let nodes = polygon.exterior().0.len();
    PolygonPart {
        polygon,
        nodes,
        split,
    }
}

enum Bisection {
    Parts(Vec<Polygon<f64>>),
    /// Zero-extent box: no cut can separate it.
    Minimal,
    Empty,
}

fn bisect(polygon: &Polygon<f64>) -> Bisection {
    let Some(rect) = polygon.bounding_rect() else {
        return Bisection::Empty;
    };
    let bbox = Aabb2::new([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
    let axis = bbox.longer_axis();
    let extent = bbox.extent(axis);
    if !(extent.is_finite() && extent > 0.0) {
        return Bisection::Minimal;
    }
    let mid = bbox.midpoint(axis);
    // the outer sides reach past the box so no polygon edge lies on them
    let outer = bbox.expanded(extent.max(1e-9));

    let (lower, upper) = match axis {
        Axis::X => (
            Rect::new(coord! { x: outer.min[0], y: outer.min[1] }, coord! { x: mid, y: outer.max[1] }),
            Rect::new(coord! { x: mid, y: outer.min[1] }, coord! { x: outer.max[0], y: outer.max[1] }),
        ),
        Axis::Y => (
            Rect::new(coord! { x: outer.min[0], y: outer.min[1] }, coord! { x: outer.max[0], y: mid }),
            Rect::new(coord! { x: outer.min[0], y: mid }, coord! { x: outer.max[0], y: outer.max[1] }),
        ),
    };

    let mut parts: Vec<Polygon<f64>> = Vec::new();
    for half in [lower, upper] {
        let clipped = polygon.intersection(&half.to_polygon());
        parts.extend(clipped.0.into_iter().filter(|p| p.exterior().0.len() >= 4));
    }

    if parts.is_empty() {
        Bisection::Empty
    } else {
        Bisection::Parts(parts)
    }
}
