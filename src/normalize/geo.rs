//! Geo-object merging and minimal GeoJSON validation

use crate::wire::GeoObjectSet;
use serde_json::{json, Map, Value};
use thiserror::Error;

const SIMPLE_GEOMETRIES: [&str; 6] = [
    "Point",
    "LineString",
    "Polygon",
    "MultiPoint",
    "MultiLineString",
    "MultiPolygon",
];

/// Why a GeoJSON object was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoJsonError {
    #[error("missing 'type' property")]
    MissingType,
    #[error("'type' property is not a string")]
    TypeNotString,
    #[error("unknown GeoJSON type: {0}")]
    UnknownType(String),
    #[error("{kind} missing '{member}' property")]
    MissingMember { kind: String, member: &'static str },
    #[error("{kind} '{member}' is not an array")]
    NotAnArray { kind: String, member: &'static str },
    #[error("{kind} has empty '{member}' array")]
    EmptyMember { kind: String, member: &'static str },
    #[error("Feature 'geometry' is not an object with a 'type'")]
    BadGeometry,
}

/// Returns true for every `type` value GeoJSON defines
pub fn is_geojson_type(kind: &str) -> bool {
    matches!(kind, "FeatureCollection" | "Feature" | "GeometryCollection")
        || SIMPLE_GEOMETRIES.contains(&kind)
}

/// Checks the minimal structural rules for a GeoJSON object.
///
/// Only the top level is inspected: collections must carry a non-empty array,
/// a Feature needs a typed geometry object, and simple geometries need a
/// `coordinates` array. Member features are not validated individually.
pub fn validate(value: &Value) -> Result<(), GeoJsonError> {
    let object = value.as_object().ok_or(GeoJsonError::MissingType)?;
    let kind = object
        .get("type")
        .ok_or(GeoJsonError::MissingType)?
        .as_str()
        .ok_or(GeoJsonError::TypeNotString)?;

    match kind {
        "FeatureCollection" => non_empty_array(object, kind, "features"),
        "GeometryCollection" => non_empty_array(object, kind, "geometries"),
        "Feature" => {
            let geometry = object.get("geometry").ok_or(GeoJsonError::MissingMember {
                kind: kind.to_string(),
                member: "geometry",
            })?;
            match geometry.as_object() {
                Some(g) if g.contains_key("type") => Ok(()),
                _ => Err(GeoJsonError::BadGeometry),
            }
        }
        simple if SIMPLE_GEOMETRIES.contains(&simple) => {
            array_member(object, kind, "coordinates").map(|_| ())
        }
        other => Err(GeoJsonError::UnknownType(other.to_string())),
    }
}

fn array_member<'a>(
    object: &'a Map<String, Value>,
    kind: &str,
    member: &'static str,
) -> Result<&'a Vec<Value>, GeoJsonError> {
    object
        .get(member)
        .ok_or_else(|| GeoJsonError::MissingMember {
            kind: kind.to_string(),
            member,
        })?
        .as_array()
        .ok_or_else(|| GeoJsonError::NotAnArray {
            kind: kind.to_string(),
            member,
        })
}

fn non_empty_array(
    object: &Map<String, Value>,
    kind: &str,
    member: &'static str,
) -> Result<(), GeoJsonError> {
    if array_member(object, kind, member)?.is_empty() {
        return Err(GeoJsonError::EmptyMember {
            kind: kind.to_string(),
            member,
        });
    }
    Ok(())
}

/// Flattens every fragment's features into one FeatureCollection.
///
/// Fragments whose `features` is not an array are skipped. Returns `None`
/// when nothing was collected or the assembled collection fails validation.
pub fn merge_geo_objects(set: &GeoObjectSet) -> Option<Value> {
    let mut features = Vec::new();

    for (label, fragment) in set.iter() {
        let kind = fragment.get("type").and_then(Value::as_str).unwrap_or_default();
        match fragment.get("features").and_then(Value::as_array) {
            Some(items) => {
                tracing::debug!(label, kind, count = items.len(), "Collected geo fragment");
                features.extend(items.iter().cloned());
            }
            None => {
                tracing::warn!(label, kind, "Skipping geo fragment without a features array");
            }
        }
    }

    if features.is_empty() {
        tracing::info!(fragments = set.len(), "No features found in geo objects, omitting geoJSON");
        return None;
    }

    let count = features.len();
    let unified = json!({
        "type": "FeatureCollection",
        "features": features,
    });

    match validate(&unified) {
        Ok(()) => {
            tracing::debug!(features = count, "Built unified GeoJSON");
            Some(unified)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Unified GeoJSON failed validation, omitting");
            None
        }
    }
}
