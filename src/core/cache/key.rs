//! Deterministic cache keys.

use super::CacheType;
use serde_json::{Map, Value};
use std::path::Path;

/// Build the cache key for a request
///
/// `"<cache_type>|<path>|<canonical params>"`, so equivalent requests
/// always land on the same row.
pub fn cache_key(cache_type: CacheType, path: &Path, params: &Value) -> String {
    format!(
        "{}|{}|{}",
        cache_type.as_str(),
        path.to_string_lossy(),
        canonical_params(params)
    )
}

/// Serialize parameters with object keys sorted at every level
///
/// `null` is treated as an empty object so "no parameters" has one spelling.
pub fn canonical_params(params: &Value) -> String {
    match params {
        Value::Null => "{}".to_string(),
        other => canonicalize(other).to_string(),
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"window": 10, "audio": {"b": 1, "a": 2}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"audio": {"a": 2, "b": 1}, "window": 10}"#).unwrap();

        assert_eq!(canonical_params(&a), canonical_params(&b));
        assert_eq!(
            cache_key(CacheType::Bitrate, Path::new("/v.mp4"), &a),
            cache_key(CacheType::Bitrate, Path::new("/v.mp4"), &b)
        );
    }

    #[test]
    fn null_and_empty_object_collide() {
        assert_eq!(canonical_params(&Value::Null), canonical_params(&json!({})));
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(
            canonical_params(&json!({ "streams": [1, 2] })),
            canonical_params(&json!({ "streams": [2, 1] }))
        );
    }

    #[test]
    fn key_is_namespaced() {
        let params = json!({});
        let bitrate = cache_key(CacheType::Bitrate, Path::new("/v.mp4"), &params);
        let streams = cache_key(CacheType::Streams, Path::new("/v.mp4"), &params);

        assert_eq!(bitrate, "bitrate|/v.mp4|{}");
        assert_ne!(bitrate, streams);
    }
}
