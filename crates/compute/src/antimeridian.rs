//! Rewrites geometry that crosses the ±180° meridian into pieces that each
//! stay inside `[-180, 180]`.
//!
//! Crossing rings and lines are first unwrapped into a continuous longitude
//! domain, cut at every `180 + 360k` meridian inside their extent, and each
//! piece is shifted back by the multiple of 360° that brings its centroid into
//! range. Input that does not cross is returned borrowed without allocating.

use std::borrow::Cow;

use geo::{
    BooleanOps, BoundingRect, Centroid, Coord, Geometry, LineString, MapCoords, MultiLineString,
    MultiPolygon, Polygon, Rect, coord,
};

const MAX_STEP: f64 = 180.0;
const EPS: f64 = 1e-9;

/// True if any adjacent pair jumps by more than 180° of longitude.
pub fn coords_cross(coords: &[Coord<f64>]) -> bool {
    coords.windows(2).any(|w| (w[1].x - w[0].x).abs() > MAX_STEP)
}

pub fn polygon_crosses(polygon: &Polygon<f64>) -> bool {
    coords_cross(&polygon.exterior().0) || polygon.interiors().iter().any(|r| coords_cross(&r.0))
}

pub fn geometry_crosses(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::Polygon(p) => polygon_crosses(p),
        Geometry::MultiPolygon(mp) => mp.0.iter().any(polygon_crosses),
        Geometry::LineString(l) => coords_cross(&l.0),
        Geometry::MultiLineString(ml) => ml.0.iter().any(|l| coords_cross(&l.0)),
        Geometry::GeometryCollection(gc) => gc.0.iter().any(geometry_crosses),
        _ => false,
    }
}

/// Makes a coordinate path continuous, starting from its own first vertex.
fn unwrap_coords(coords: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let mut out = Vec::with_capacity(coords.len());
    let Some(first) = coords.first() else {
        return out;
    };
    out.push(*first);
    let mut prev_x = first.x;
    for c in &coords[1..] {
        let dx = c.x - prev_x;
        let x = if dx > MAX_STEP {
            c.x - 360.0 * ((dx - MAX_STEP) / 360.0).ceil()
        } else if dx < -MAX_STEP {
            c.x + 360.0 * ((-dx - MAX_STEP) / 360.0).ceil()
        } else {
            c.x
        };
        out.push(coord! { x: x, y: c.y });
        prev_x = x;
    }
    out
}

fn unwrap_polygon(polygon: &Polygon<f64>) -> Polygon<f64> {
    Polygon::new(
        LineString(unwrap_coords(&polygon.exterior().0)),
        polygon
            .interiors()
            .iter()
            .map(|r| LineString(unwrap_coords(&r.0)))
            .collect(),
    )
}

/// Multiple of 360° that moves longitude `cx` into `[-180, 180)`.
fn wrap_shift(cx: f64) -> f64 {
    -360.0 * ((cx + 180.0) / 360.0).floor()
}

/// Meridians `180 + 360k` strictly inside `(min_x, max_x)`, ascending.
fn cut_meridians(min_x: f64, max_x: f64) -> Vec<f64> {
    let mut cuts = Vec::new();
    if !(min_x.is_finite() && max_x.is_finite()) {
        return cuts;
    }
    let mut x = ((min_x - 180.0) / 360.0).floor() * 360.0 + 180.0;
    while x <= max_x + EPS {
        if x > min_x && x < max_x {
            cuts.push(x);
        }
        x += 360.0;
    }
    cuts
}

fn on_cut_meridian(x: f64) -> bool {
    ((x - 180.0) / 360.0).fract().abs() < EPS
}

fn shift_polygon(piece: Polygon<f64>) -> Polygon<f64> {
    let Some(c) = piece.centroid() else {
        return piece;
    };
    let shift = wrap_shift(c.x());
    if shift.abs() > EPS {
        piece.map_coords(|p| coord! { x: p.x + shift, y: p.y })
    } else {
        piece
    }
}

/// Splits one polygon at the antimeridian. Returns the input borrowed when it
/// does not cross, and also when splitting leaves nothing (normalization
/// declined).
pub fn normalize_polygon(polygon: &Polygon<f64>) -> Cow<'_, [Polygon<f64>]> {
    if !polygon_crosses(polygon) {
        return Cow::Borrowed(std::slice::from_ref(polygon));
    }

    let unwrapped = unwrap_polygon(polygon);
    let Some(bbox) = unwrapped.bounding_rect() else {
        return Cow::Borrowed(std::slice::from_ref(polygon));
    };
    let (min, max) = (bbox.min(), bbox.max());

    let mut edges = vec![min.x - 1.0];
    edges.extend(cut_meridians(min.x, max.x));
    edges.push(max.x + 1.0);

    let mut pieces = Vec::new();
    for band in edges.windows(2) {
        let rect = Rect::new(
            coord! { x: band[0], y: min.y - 1.0 },
            coord! { x: band[1], y: max.y + 1.0 },
        )
        .to_polygon();
        let clipped: MultiPolygon<f64> = unwrapped.intersection(&rect);
        pieces.extend(
            clipped
                .0
                .into_iter()
                .filter(|p| p.exterior().0.len() >= 4)
                .map(shift_polygon),
        );
    }

    if pieces.is_empty() {
        tracing::debug!("antimeridian split produced no pieces, keeping input");
        return Cow::Borrowed(std::slice::from_ref(polygon));
    }
    Cow::Owned(pieces)
}

fn shift_line(piece: Vec<Coord<f64>>) -> LineString<f64> {
    let line = LineString(piece);
    let cx = line
        .centroid()
        .map(|c| c.x())
        .or_else(|| line.0.first().map(|c| c.x))
        .unwrap_or(0.0);
    let shift = wrap_shift(cx);
    if shift.abs() > EPS {
        line.map_coords(|p| coord! { x: p.x + shift, y: p.y })
    } else {
        line
    }
}

/// Splits one line at the antimeridian, interpolating the crossing point.
/// Non-crossing lines come back borrowed.
pub fn normalize_line(line: &LineString<f64>) -> Cow<'_, [LineString<f64>]> {
    if line.0.len() < 2 || !coords_cross(&line.0) {
        return Cow::Borrowed(std::slice::from_ref(line));
    }

    let unwrapped = unwrap_coords(&line.0);
    let mut pieces: Vec<Vec<Coord<f64>>> = Vec::new();
    let mut current = vec![unwrapped[0]];
    let last = unwrapped.len() - 1;
    for (i, w) in unwrapped.windows(2).enumerate() {
        let (a, b) = (w[0], w[1]);
        let (lo, hi) = if a.x < b.x { (a.x, b.x) } else { (b.x, a.x) };
        // after unwrapping a segment spans at most 180°, so at most one cut
        let bx = ((hi - 180.0) / 360.0).floor() * 360.0 + 180.0;
        if bx > lo && bx < hi {
            let t = (bx - a.x) / (b.x - a.x);
            let p = coord! { x: bx, y: a.y + t * (b.y - a.y) };
            current.push(p);
            pieces.push(std::mem::replace(&mut current, vec![p]));
        }
        current.push(b);
        // a vertex sitting exactly on the meridian ends the piece there
        if i + 1 < last && on_cut_meridian(b.x) {
            pieces.push(std::mem::replace(&mut current, vec![b]));
        }
    }
    pieces.push(current);

    let out: Vec<LineString<f64>> = pieces
        .into_iter()
        .filter(|p| p.len() >= 2)
        .map(shift_line)
        .collect();
    if out.is_empty() {
        return Cow::Borrowed(std::slice::from_ref(line));
    }
    Cow::Owned(out)
}

/// Geometry-level normalization. Polygonal and lineal input is rewritten;
/// everything else, and everything that does not cross, is returned as is.
pub fn normalize(geometry: &Geometry<f64>) -> Cow<'_, Geometry<f64>> {
    if !geometry_crosses(geometry) {
        return Cow::Borrowed(geometry);
    }
    match geometry {
        Geometry::Polygon(p) => Cow::Owned(polygons_to_geometry(normalize_polygon(p).into_owned())),
        Geometry::MultiPolygon(mp) => Cow::Owned(polygons_to_geometry(
            mp.0.iter().flat_map(|p| normalize_polygon(p).into_owned()).collect(),
        )),
        Geometry::LineString(l) => Cow::Owned(lines_to_geometry(normalize_line(l).into_owned())),
        Geometry::MultiLineString(ml) => Cow::Owned(lines_to_geometry(
            ml.0.iter().flat_map(|l| normalize_line(l).into_owned()).collect(),
        )),
        _ => Cow::Borrowed(geometry),
    }
}

fn polygons_to_geometry(mut parts: Vec<Polygon<f64>>) -> Geometry<f64> {
    if parts.len() == 1 {
        Geometry::Polygon(parts.remove(0))
    } else {
        Geometry::MultiPolygon(MultiPolygon(parts))
    }
}

fn lines_to_geometry(mut parts: Vec<LineString<f64>>) -> Geometry<f64> {
    if parts.len() == 1 {
        Geometry::LineString(parts.remove(0))
    } else {
        Geometry::MultiLineString(MultiLineString(parts))
    }
}
