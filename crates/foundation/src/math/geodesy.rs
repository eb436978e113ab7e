//! Ellipsoidal measurement of lon/lat rings and lines.
//!
//! Area and length are integrated on the WGS84 ellipsoid (Karney's algorithm
//! via `geo`), never on a planar projection. Inputs are EPSG:4326 degrees with
//! `x = lon`, `y = lat`.

use geo::{Coord, GeodesicArea, GeodesicLength, LineString, MultiPolygon, Polygon};

/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 semi-minor axis (meters).
pub const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

const SQ_M_PER_SQ_KM: f64 = 1_000_000.0;
const M_PER_KM: f64 = 1_000.0;

/// Number of distinct vertices in a ring, ignoring consecutive repeats and the
/// closing coordinate.
pub fn distinct_vertex_count(coords: &[Coord<f64>]) -> usize {
    let mut count = 0;
    let mut prev: Option<Coord<f64>> = None;
    for c in coords {
        if prev != Some(*c) {
            count += 1;
        }
        prev = Some(*c);
    }
    if count > 1 && coords.first() == coords.last() {
        count -= 1;
    }
    count
}

/// Unsigned geodesic area of a single ring in square meters.
///
/// Rings with fewer than three distinct vertices contribute zero.
pub fn ring_area_m2(ring: &LineString<f64>) -> f64 {
    if distinct_vertex_count(&ring.0) < 3 {
        return 0.0;
    }
    Polygon::new(ring.clone(), vec![])
        .geodesic_area_unsigned()
        .abs()
}

/// Geodesic area of a polygon in km²: exterior minus holes, floored at zero.
pub fn polygon_area_km2(polygon: &Polygon<f64>) -> f64 {
    let mut area_m2 = ring_area_m2(polygon.exterior());
    if area_m2 == 0.0 {
        return 0.0;
    }
    for hole in polygon.interiors() {
        area_m2 -= ring_area_m2(hole);
    }
    area_m2.max(0.0) / SQ_M_PER_SQ_KM
}

pub fn multi_polygon_area_km2(multi: &MultiPolygon<f64>) -> f64 {
    multi.0.iter().map(polygon_area_km2).sum()
}

/// Geodesic length of a line in km; lines with fewer than two coordinates
/// have length zero.
pub fn line_length_km(line: &LineString<f64>) -> f64 {
    if line.0.len() < 2 {
        return 0.0;
    }
    line.geodesic_length().max(0.0) / M_PER_KM
}
