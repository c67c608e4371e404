//! Upstream response normalization
//!
//! The generation backend has emitted several payload shapes over its
//! lifetime. Each raw payload is decoded once into an [`UpstreamPayload`]
//! variant and then rendered as the single client frame shape.

mod geo;

#[cfg(test)]
mod proptests;

use geo::{is_geojson_type, merge_geo_objects, validate};

use crate::wire::{FinalResponse, GeoObjectSet};
use serde_json::{Map, Value};

/// A raw upstream payload, classified
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamPayload {
    /// Geo objects alongside a status and/or an answer
    Combined {
        status: Option<String>,
        answer: Option<String>,
        geo_objects: GeoObjectSet,
    },
    StatusOnly {
        status: String,
    },
    StatusAnswer {
        status: Option<String>,
        answer: String,
    },
    GeoObjectsOnly {
        geo_objects: GeoObjectSet,
    },
    /// A GeoJSON object sent directly as the payload (already validated)
    BareGeoJson(Value),
    /// Anything else; forwarded verbatim as status text
    Opaque(String),
}

impl UpstreamPayload {
    /// Classify a raw payload by inspecting its discriminating keys once
    pub fn classify(raw: &str) -> Self {
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw) else {
            return Self::Opaque(raw.to_string());
        };

        let status = non_empty_str(&object, "status");
        let answer = non_empty_str(&object, "response");
        let geo_objects = decode_geo_objects(&object);

        match (status, answer, geo_objects) {
            (None, None, None) => classify_bare(raw, object),
            (None, None, Some(geo_objects)) => Self::GeoObjectsOnly { geo_objects },
            (status, answer, Some(geo_objects)) => Self::Combined {
                status,
                answer,
                geo_objects,
            },
            (Some(status), None, None) => Self::StatusOnly { status },
            (status, Some(answer), None) => Self::StatusAnswer { status, answer },
        }
    }

    pub fn into_response(self) -> FinalResponse {
        match self {
            Self::Combined {
                status,
                answer,
                geo_objects,
            } => with_geo(
                FinalResponse::default()
                    .with_status(status.unwrap_or_default())
                    .with_answer(answer.as_deref().unwrap_or_default()),
                geo_objects,
            ),
            Self::StatusOnly { status } => FinalResponse::status(status),
            Self::StatusAnswer { status, answer } => FinalResponse::default()
                .with_status(status.unwrap_or_default())
                .with_answer(&answer),
            Self::GeoObjectsOnly { geo_objects } => with_geo(FinalResponse::default(), geo_objects),
            Self::BareGeoJson(value) => FinalResponse {
                geo_json: Some(value),
                ..FinalResponse::default()
            },
            Self::Opaque(raw) => FinalResponse {
                status: Some(raw),
                ..FinalResponse::default()
            },
        }
    }
}

/// Normalize one raw upstream payload into a client frame
pub fn normalize(raw: &str) -> FinalResponse {
    let payload = UpstreamPayload::classify(raw);
    if let UpstreamPayload::Opaque(_) = &payload {
        tracing::debug!(len = raw.len(), "Unrecognised upstream payload, forwarding as status");
    }
    payload.into_response()
}

fn with_geo(mut response: FinalResponse, geo_objects: GeoObjectSet) -> FinalResponse {
    response.geo_json = merge_geo_objects(&geo_objects);
    response.geo_objects = Some(geo_objects);
    response
}

fn non_empty_str(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Collect every `geo_objects` entry untouched. `None` when the key is
/// absent, not an object, or empty.
fn decode_geo_objects(object: &Map<String, Value>) -> Option<GeoObjectSet> {
    let entries = object.get("geo_objects")?.as_object()?;
    let mut set = GeoObjectSet::new();
    for (label, fragment) in entries {
        set.push(label.clone(), fragment.clone());
    }
    (!set.is_empty()).then_some(set)
}

fn classify_bare(raw: &str, object: Map<String, Value>) -> UpstreamPayload {
    let is_geojson = object
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(is_geojson_type);
    if !is_geojson {
        return UpstreamPayload::Opaque(raw.to_string());
    }

    let value = Value::Object(object);
    match validate(&value) {
        Ok(()) => UpstreamPayload::BareGeoJson(value),
        Err(e) => {
            tracing::warn!(error = %e, "Direct GeoJSON payload failed validation");
            UpstreamPayload::Opaque(raw.to_string())
        }
    }
}
