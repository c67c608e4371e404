//! Property-based tests for response normalization
//!
//! - Merged feature count equals the sum of every fragment's features
//! - Features keep fragment-then-feature order
//! - Fragments without features never produce a geoJSON field
//! - Normalization is deterministic

use super::*;
use proptest::prelude::*;
use serde_json::json;

fn arb_point() -> impl Strategy<Value = Value> {
    (-180i64..180, -90i64..90).prop_map(|(x, y)| {
        json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [x, y]},
            "properties": {}
        })
    })
}

/// Fragments with distinct labels, each holding 0..4 point features
fn arb_fragments() -> impl Strategy<Value = Vec<(String, Vec<Value>)>> {
    proptest::collection::vec(proptest::collection::vec(arb_point(), 0..4), 1..5).prop_map(
        |groups| {
            groups
                .into_iter()
                .enumerate()
                .map(|(i, features)| (format!("layer_{i}"), features))
                .collect()
        },
    )
}

fn payload(answer: Option<&str>, fragments: &[(String, Vec<Value>)]) -> String {
    let mut geo_objects = Map::new();
    for (label, features) in fragments {
        geo_objects.insert(
            label.clone(),
            json!({"type": "FeatureCollection", "features": features}),
        );
    }
    let mut object = Map::new();
    if let Some(answer) = answer {
        object.insert("response".to_string(), json!(answer));
    }
    object.insert("geo_objects".to_string(), Value::Object(geo_objects));
    Value::Object(object).to_string()
}

proptest! {
    #[test]
    fn prop_merge_preserves_count_and_order(
        fragments in arb_fragments(),
        answer in proptest::option::of("[a-zA-Z ]{1,20}"),
    ) {
        let raw = payload(answer.as_deref(), &fragments);
        let response = normalize(&raw);
        let expected: Vec<Value> = fragments
            .iter()
            .flat_map(|(_, features)| features.iter().cloned())
            .collect();

        if expected.is_empty() {
            prop_assert!(response.geo_json.is_none());
        } else {
            let geo = response.geo_json.clone().unwrap();
            prop_assert_eq!(geo["features"].as_array().unwrap(), &expected);
        }
        prop_assert_eq!(response.geo_objects.as_ref().map(GeoObjectSet::len), Some(fragments.len()));
        prop_assert_eq!(response.answer_text(), answer.as_deref());
    }

    #[test]
    fn prop_normalize_is_deterministic(raw in ".{0,64}") {
        let first = normalize(&raw).to_json().unwrap();
        let second = normalize(&raw).to_json().unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_unrecognised_text_is_never_dropped(raw in "[a-z ]{1,40}") {
        let response = normalize(&raw);
        prop_assert_eq!(response.status.as_deref(), Some(raw.as_str()));
    }
}
