//! Dynamic content snapshots and content hashing.
//!
//! Scraped content is loosely structured, so a [`Snapshot`] is a JSON object:
//! string keys mapping to strings, numbers, booleans, nulls, nested objects
//! or lists. Change detection works over this shape generically.
//!
//! Hashes are SHA-256 over the canonical JSON form (object keys sorted,
//! no whitespace). They are used for cheap equality checks and audit
//! trails only; change detection diffs structurally.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A structured content record.
pub type Snapshot = Map<String, Value>;

/// Recursive structural equality.
///
/// Arrays compare element-wise in order, objects by key set and value.
/// Numbers compare by numeric value, so `5` equals `5.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => {
            if x == y {
                return true;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(fx), Some(fy)) => fx == fy,
                _ => false,
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => false,
    }
}

/// Serialize a value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 hex digest of a value's canonical JSON.
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// [`content_hash`] for a snapshot.
pub fn snapshot_hash(snapshot: &Snapshot) -> String {
    content_hash(&Value::Object(snapshot.clone()))
}

/// Parse a stored JSON column into a snapshot. Non-objects become empty.
pub fn snapshot_from_json(raw: &str) -> serde_json::Result<Snapshot> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Snapshot::new()),
    }
}

pub fn snapshot_to_json(snapshot: &Snapshot) -> String {
    canonical_json(&Value::Object(snapshot.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_ignores_key_order() {
        let a = json!({"title": "A", "tags": ["x", "y"], "nested": {"b": 1, "a": 2}});
        let b = json!({"nested": {"a": 2, "b": 1}, "tags": ["x", "y"], "title": "A"});
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);
    }

    #[test]
    fn test_hash_respects_array_order() {
        let a = json!({"tags": ["x", "y"]});
        let b = json!({"tags": ["y", "x"]});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_canonical_form() {
        let v = json!({"b": [1, {"d": null, "c": true}], "a": "s\"q"});
        assert_eq!(canonical_json(&v), r#"{"a":"s\"q","b":[1,{"c":true,"d":null}]}"#);
    }

    #[test]
    fn test_numeric_equality() {
        assert!(values_equal(&json!(5), &json!(5.0)));
        assert!(!values_equal(&json!(5), &json!(6)));
        assert!(!values_equal(&json!("5"), &json!(5)));
    }

    #[test]
    fn test_deep_equality() {
        assert!(values_equal(
            &json!({"a": [1, {"b": "c"}]}),
            &json!({"a": [1, {"b": "c"}]})
        ));
        assert!(!values_equal(&json!({"a": [1, 2]}), &json!({"a": [2, 1]})));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": null})));
    }

    #[test]
    fn test_snapshot_from_non_object() {
        assert!(snapshot_from_json("[1,2]").unwrap().is_empty());
        assert!(snapshot_from_json("not json").is_err());
    }
}
