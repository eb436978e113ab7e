use geo::{CoordsIter, Geometry, Polygon};

/// Node count that decides whether a feature is subdivided.
///
/// Polygons count their exterior ring only; holes are ignored here even
/// though they take part in area. Lines count every coordinate of every part,
/// points count one per point.
pub fn node_count(geometry: &Geometry<f64>) -> usize {
    match geometry {
        Geometry::Polygon(p) => p.exterior().0.len(),
        Geometry::MultiPolygon(mp) => mp.0.iter().map(|p| p.exterior().0.len()).sum(),
        Geometry::LineString(l) => l.0.len(),
        Geometry::MultiLineString(ml) => ml.0.iter().map(|l| l.0.len()).sum(),
        Geometry::Point(_) => 1,
        Geometry::MultiPoint(mp) => mp.0.len(),
        Geometry::GeometryCollection(gc) => gc.0.iter().map(node_count).sum(),
        Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => 0,
    }
}

/// Every coordinate of a polygon, holes included.
pub fn total_coordinates(polygon: &Polygon<f64>) -> usize {
    polygon.coords_count()
}
