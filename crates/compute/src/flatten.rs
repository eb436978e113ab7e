use formats::GeometryType;
use geo::{Geometry, LineString, Point, Polygon};

use crate::error::ProcessError;

/// Multipart-to-singlepart for polygonal input.
pub fn flatten_polygons(geometry: &Geometry<f64>) -> Result<Vec<Polygon<f64>>, ProcessError> {
    let mut out = Vec::new();
    push_polygons(geometry, &mut out)?;
    Ok(out)
}

fn push_polygons(geometry: &Geometry<f64>, out: &mut Vec<Polygon<f64>>) -> Result<(), ProcessError> {
    match geometry {
        Geometry::Polygon(p) => out.push(p.clone()),
        Geometry::MultiPolygon(mp) => out.extend(mp.0.iter().cloned()),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::Triangle(t) => out.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for member in &gc.0 {
                push_polygons(member, out)?;
            }
        }
        other => return Err(ProcessError::unsupported(GeometryType::of(other))),
    }
    Ok(())
}

/// Multipart-to-singlepart for lineal input. Parts of a MultiLineString need
/// at least two coordinates to survive.
pub fn flatten_lines(geometry: &Geometry<f64>) -> Result<Vec<LineString<f64>>, ProcessError> {
    let mut out = Vec::new();
    push_lines(geometry, &mut out)?;
    Ok(out)
}

fn push_lines(geometry: &Geometry<f64>, out: &mut Vec<LineString<f64>>) -> Result<(), ProcessError> {
    match geometry {
        Geometry::LineString(l) => out.push(l.clone()),
        Geometry::Line(l) => out.push(LineString::from(vec![l.start, l.end])),
        Geometry::MultiLineString(ml) => {
            out.extend(ml.0.iter().filter(|l| l.0.len() >= 2).cloned());
        }
        Geometry::GeometryCollection(gc) => {
            for member in &gc.0 {
                push_lines(member, out)?;
            }
        }
        other => return Err(ProcessError::unsupported(GeometryType::of(other))),
    }
    Ok(())
}

/// Explodes puntal input into single points.
pub fn flatten_points(geometry: &Geometry<f64>) -> Result<Vec<Point<f64>>, ProcessError> {
    let mut out = Vec::new();
    push_points(geometry, &mut out)?;
    Ok(out)
}

fn push_points(geometry: &Geometry<f64>, out: &mut Vec<Point<f64>>) -> Result<(), ProcessError> {
    match geometry {
        Geometry::Point(p) => out.push(*p),
        Geometry::MultiPoint(mp) => out.extend(mp.0.iter().copied()),
        Geometry::GeometryCollection(gc) => {
            for member in &gc.0 {
                push_points(member, out)?;
            }
        }
        other => return Err(ProcessError::unsupported(GeometryType::of(other))),
    }
    Ok(())
}
