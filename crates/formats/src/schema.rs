use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feature::{Feature, GeometryType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Int,
    Float,
    Str,
    Bool,
    /// Arrays, objects and mixed-type columns.
    Json,
}

impl PropertyType {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(PropertyType::Bool),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(PropertyType::Int),
            Value::Number(_) => Some(PropertyType::Float),
            Value::String(_) => Some(PropertyType::Str),
            Value::Array(_) | Value::Object(_) => Some(PropertyType::Json),
        }
    }

    fn widen(self, other: PropertyType) -> PropertyType {
        use PropertyType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Int, Float) | (Float, Int) => Float,
            _ => Json,
        }
    }
}

/// Geometry type plus ordered property columns of a source or sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// `None` means mixed or unknown.
    pub geometry_type: Option<GeometryType>,
    pub properties: Vec<(String, PropertyType)>,
}

impl Schema {
    /// Infers a schema from a sample of features. Columns keep first-seen
    /// order; conflicting numeric types widen to float, anything else to json.
    pub fn infer<'a>(features: impl IntoIterator<Item = &'a Feature>) -> Self {
        let mut schema = Schema::default();
        let mut first = true;
        for feature in features {
            let ty = feature.geometry_type();
            if first {
                schema.geometry_type = Some(ty);
                first = false;
            } else if schema.geometry_type != Some(ty) {
                schema.geometry_type = None;
            }

            for (key, value) in &feature.properties {
                let Some(pty) = PropertyType::of(value) else {
                    continue;
                };
                match schema.properties.iter_mut().find(|(k, _)| k == key) {
                    Some((_, existing)) => *existing = existing.widen(pty),
                    None => schema.properties.push((key.clone(), pty)),
                }
            }
        }
        schema
    }

    pub fn with_geometry(mut self, geometry_type: Option<GeometryType>) -> Self {
        self.geometry_type = geometry_type;
        self
    }

    /// Adds a column, or replaces its type if it already exists.
    pub fn with_property(mut self, name: &str, ty: PropertyType) -> Self {
        match self.properties.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => *existing = ty,
            None => self.properties.push((name.to_string(), ty)),
        }
        self
    }

    pub fn property(&self, name: &str) -> Option<PropertyType> {
        self.properties
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, t)| *t)
    }
}
