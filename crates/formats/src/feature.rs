use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FormatError;

pub type Properties = Map<String, Value>;

/// One input or output record. Features are never mutated in place; derived
/// features copy and extend `properties`.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<String>,
    pub properties: Properties,
    pub geometry: Geometry<f64>,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>, properties: Properties) -> Self {
        Self {
            id: None,
            properties,
            geometry: geometry.into(),
        }
    }

    pub fn geometry_type(&self) -> GeometryType {
        GeometryType::of(&self.geometry)
    }

    /// Parses a single GeoJSON `Feature` object. `index` is only used for
    /// error reporting.
    pub fn from_geojson_value(value: &Value, index: usize) -> Result<Self, FormatError> {
        let feat_obj = value.as_object().ok_or(FormatError::InvalidFeature {
            index,
            reason: "feature must be an object".to_string(),
        })?;

        let feat_type = feat_obj.get("type").and_then(|v| v.as_str()).ok_or(
            FormatError::InvalidFeature {
                index,
                reason: "feature missing type".to_string(),
            },
        )?;
        if feat_type != "Feature" {
            return Err(FormatError::InvalidFeature {
                index,
                reason: format!("unexpected feature type: {feat_type}"),
            });
        }

        let id = match feat_obj.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let properties = feat_obj
            .get("properties")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let geometry_val = feat_obj
            .get("geometry")
            .filter(|v| !v.is_null())
            .ok_or(FormatError::InvalidFeature {
                index,
                reason: "feature missing geometry".to_string(),
            })?;
        let geometry = parse_geometry(geometry_val)
            .map_err(|reason| FormatError::InvalidFeature { index, reason })?;

        Ok(Self {
            id,
            properties,
            geometry,
        })
    }

    pub fn to_geojson_value(&self) -> Value {
        let mut fobj = Map::new();
        fobj.insert("type".to_string(), Value::String("Feature".to_string()));
        if let Some(id) = &self.id {
            fobj.insert("id".to_string(), Value::String(id.clone()));
        }
        fobj.insert(
            "properties".to_string(),
            Value::Object(self.properties.clone()),
        );
        fobj.insert(
            "geometry".to_string(),
            geometry_to_geojson_value(&self.geometry),
        );
        Value::Object(fobj)
    }
}

/// Geometry kinds as they appear in GeoJSON and in sink schemas.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    GeometryCollection,
    /// geo-only primitives (Line, Rect, Triangle) with no GeoJSON spelling.
    Other,
}

impl GeometryType {
    pub fn of(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            Geometry::LineString(_) => GeometryType::LineString,
            Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            Geometry::Polygon(_) => GeometryType::Polygon,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryType::GeometryCollection,
            Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => GeometryType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::MultiPoint => "MultiPoint",
            GeometryType::LineString => "LineString",
            GeometryType::MultiLineString => "MultiLineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiPolygon => "MultiPolygon",
            GeometryType::GeometryCollection => "GeometryCollection",
            GeometryType::Other => "Other",
        }
    }

    pub fn is_polygonal(&self) -> bool {
        matches!(self, GeometryType::Polygon | GeometryType::MultiPolygon)
    }

    pub fn is_lineal(&self) -> bool {
        matches!(self, GeometryType::LineString | GeometryType::MultiLineString)
    }

    pub fn is_puntal(&self) -> bool {
        matches!(self, GeometryType::Point | GeometryType::MultiPoint)
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn parse_feature_collection(payload: &str) -> Result<Vec<Feature>, FormatError> {
    let value: Value = serde_json::from_str(payload).map_err(|e| FormatError::Parse {
        line: e.line(),
        reason: format!("JSON parse error: {e}"),
    })?;
    let obj = value.as_object().ok_or(FormatError::NotAFeatureCollection)?;
    let ty = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(FormatError::NotAFeatureCollection)?;
    if ty != "FeatureCollection" {
        return Err(FormatError::NotAFeatureCollection);
    }

    let features_val = obj
        .get("features")
        .and_then(|v| v.as_array())
        .ok_or(FormatError::NotAFeatureCollection)?;

    features_val
        .iter()
        .enumerate()
        .map(|(index, v)| Feature::from_geojson_value(v, index))
        .collect()
}

pub fn geometry_to_geojson_value(geom: &Geometry<f64>) -> Value {
    let mut obj = Map::new();
    let ty = GeometryType::of(geom);
    obj.insert("type".to_string(), Value::String(ty.as_str().to_string()));
    match geom {
        Geometry::Point(p) => {
            obj.insert("coordinates".to_string(), coord_value(&p.0));
        }
        Geometry::MultiPoint(ps) => {
            let coords = ps.0.iter().map(|p| coord_value(&p.0)).collect();
            obj.insert("coordinates".to_string(), Value::Array(coords));
        }
        Geometry::LineString(line) => {
            obj.insert("coordinates".to_string(), line_value(line));
        }
        Geometry::MultiLineString(lines) => {
            let coords = lines.0.iter().map(line_value).collect();
            obj.insert("coordinates".to_string(), Value::Array(coords));
        }
        Geometry::Polygon(poly) => {
            obj.insert("coordinates".to_string(), polygon_value(poly));
        }
        Geometry::MultiPolygon(polys) => {
            let coords = polys.0.iter().map(polygon_value).collect();
            obj.insert("coordinates".to_string(), Value::Array(coords));
        }
        Geometry::GeometryCollection(gc) => {
            let members = gc.0.iter().map(geometry_to_geojson_value).collect();
            obj.insert("geometries".to_string(), Value::Array(members));
        }
        Geometry::Line(line) => {
            obj.insert("type".to_string(), Value::String("LineString".to_string()));
            obj.insert(
                "coordinates".to_string(),
                Value::Array(vec![coord_value(&line.start), coord_value(&line.end)]),
            );
        }
        Geometry::Rect(rect) => {
            obj.insert("type".to_string(), Value::String("Polygon".to_string()));
            obj.insert("coordinates".to_string(), polygon_value(&rect.to_polygon()));
        }
        Geometry::Triangle(tri) => {
            obj.insert("type".to_string(), Value::String("Polygon".to_string()));
            obj.insert("coordinates".to_string(), polygon_value(&tri.to_polygon()));
        }
    }
    Value::Object(obj)
}

fn coord_value(c: &Coord<f64>) -> Value {
    Value::Array(vec![Value::from(c.x), Value::from(c.y)])
}

fn line_value(line: &LineString<f64>) -> Value {
    Value::Array(line.0.iter().map(coord_value).collect())
}

fn polygon_value(poly: &Polygon<f64>) -> Value {
    let mut rings = Vec::with_capacity(1 + poly.interiors().len());
    rings.push(line_value(poly.exterior()));
    rings.extend(poly.interiors().iter().map(line_value));
    Value::Array(rings)
}

pub fn parse_geometry(value: &Value) -> Result<Geometry<f64>, String> {
    let obj = value
        .as_object()
        .ok_or("geometry must be an object".to_string())?;
    let ty = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or("geometry missing type".to_string())?;

    if ty == "GeometryCollection" {
        let members = obj
            .get("geometries")
            .and_then(|v| v.as_array())
            .ok_or("GeometryCollection missing geometries".to_string())?;
        let mut out = Vec::with_capacity(members.len());
        for m in members {
            out.push(parse_geometry(m)?);
        }
        return Ok(Geometry::GeometryCollection(GeometryCollection(out)));
    }

    let coords = obj
        .get("coordinates")
        .ok_or("geometry missing coordinates".to_string())?;

    match ty {
        "Point" => Ok(Geometry::Point(Point(parse_coord(coords)?))),
        "MultiPoint" => Ok(Geometry::MultiPoint(MultiPoint(
            parse_coords(coords)?.into_iter().map(Point).collect(),
        ))),
        "LineString" => Ok(Geometry::LineString(LineString(parse_coords(coords)?))),
        "MultiLineString" => Ok(Geometry::MultiLineString(MultiLineString(parse_lines(
            coords,
        )?))),
        "Polygon" => Ok(Geometry::Polygon(parse_polygon(coords)?)),
        "MultiPolygon" => Ok(Geometry::MultiPolygon(parse_multi_polygon(coords)?)),
        other => Err(format!("unsupported geometry type: {other}")),
    }
}

fn parse_coord(coords: &Value) -> Result<Coord<f64>, String> {
    let arr = coords
        .as_array()
        .ok_or("position must be an array".to_string())?;
    if arr.len() < 2 {
        return Err("position must have [lon, lat]".to_string());
    }
    let x = arr[0].as_f64().ok_or("lon must be a number".to_string())?;
    let y = arr[1].as_f64().ok_or("lat must be a number".to_string())?;
    Ok(Coord { x, y })
}

fn parse_coords(coords: &Value) -> Result<Vec<Coord<f64>>, String> {
    let arr = coords
        .as_array()
        .ok_or("coordinates must be an array".to_string())?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        out.push(parse_coord(item)?);
    }
    Ok(out)
}

fn parse_lines(coords: &Value) -> Result<Vec<LineString<f64>>, String> {
    let arr = coords
        .as_array()
        .ok_or("MultiLineString coordinates must be an array".to_string())?;
    let mut out = Vec::with_capacity(arr.len());
    for line in arr {
        out.push(LineString(parse_coords(line)?));
    }
    Ok(out)
}

fn parse_polygon(coords: &Value) -> Result<Polygon<f64>, String> {
    let mut rings = parse_lines(coords)
        .map_err(|_| "Polygon coordinates must be an array of rings".to_string())?
        .into_iter();
    let exterior = rings.next().unwrap_or_else(|| LineString(Vec::new()));
    Ok(Polygon::new(exterior, rings.collect()))
}

fn parse_multi_polygon(coords: &Value) -> Result<MultiPolygon<f64>, String> {
    let polys = coords
        .as_array()
        .ok_or("MultiPolygon coordinates must be an array of polygons".to_string())?;
    let mut out = Vec::with_capacity(polys.len());
    for poly in polys {
        out.push(parse_polygon(poly)?);
    }
    Ok(MultiPolygon(out))
}

#[cfg(test)]
mod tests {
    use super::{Feature, GeometryType, parse_feature_collection, parse_geometry};
    use geo::Geometry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_collection_with_mixed_geometries() {
        let payload = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": 7, "properties": {"name": "a"},
                 "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}},
                {"type": "Feature", "properties": null,
                 "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[0, 0], [1, 0], [1, 1], [0, 0]]],
                    [[[5, 5], [6, 5], [6, 6], [5, 5]]]
                 ]}}
            ]
        })
        .to_string();

        let features = parse_feature_collection(&payload).expect("parse");
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].id.as_deref(), Some("7"));
        assert_eq!(features[0].geometry_type(), GeometryType::Point);
        assert_eq!(features[1].geometry_type(), GeometryType::MultiPolygon);
        assert!(features[1].properties.is_empty());
    }

    #[test]
    fn rejects_missing_geometry() {
        let v = json!({"type": "Feature", "properties": {}, "geometry": null});
        let err = Feature::from_geojson_value(&v, 3).unwrap_err();
        assert!(err.to_string().contains("index 3"));
    }

    #[test]
    fn geometry_collection_members_are_kept() {
        let v = json!({"type": "GeometryCollection", "geometries": [
            {"type": "LineString", "coordinates": [[0, 0], [1, 1]]},
            {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}
        ]});
        let Geometry::GeometryCollection(gc) = parse_geometry(&v).unwrap() else {
            panic!("expected collection");
        };
        assert_eq!(gc.0.len(), 2);
    }

    #[test]
    fn feature_round_trips_through_geojson() {
        let v = json!({"type": "Feature", "properties": {"b": 1, "a": "x"},
            "geometry": {"type": "Polygon", "coordinates": [
                [[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 0.0]],
                [[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 1.0]]
            ]}});
        let feature = Feature::from_geojson_value(&v, 0).unwrap();
        assert_eq!(feature.to_geojson_value(), v);
        // property order survives parsing
        let keys: Vec<_> = feature.properties.keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn unknown_geometry_type_is_an_error() {
        let v = json!({"type": "Circle", "coordinates": [0, 0]});
        assert!(parse_geometry(&v).unwrap_err().contains("Circle"));
    }
}
