//! Canonical serialization, weak validators, and structural equality.
//!
//! The fingerprint is a change detector, not a security control: two
//! aggregates hash equal iff their canonical (recursively key-sorted)
//! JSON encodings are equal. Array order is significant; object key
//! order is not.

use md5::{Digest, Md5};
use serde_json::{Map, Value};

/// Rebuild a value with object keys in sorted order, recursively.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (key, val) in entries {
                out.insert(key.clone(), canonicalize(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical key-sorted JSON encoding of a document.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).expect("canonical json value serializes")
}

/// Weak validator over the canonical encoding, in ETag form: `W/"<md5-hex>"`.
pub fn fingerprint(value: &Value) -> String {
    let mut hasher = Md5::new();
    hasher.update(canonical_json(value).as_bytes());
    format!("W/\"{:x}\"", hasher.finalize())
}

/// Recursive key/value comparison, insensitive to object key order.
///
/// Used by the partial-update merge to decide whether an incoming
/// `linkedPlanServices` entry already exists.
pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left.iter().all(|(key, value)| {
                    right
                        .get(key)
                        .is_some_and(|other| structurally_equal(value, other))
                })
        }
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right.iter())
                    .all(|(x, y)| structurally_equal(x, y))
        }
        (left, right) => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_deterministic() {
        let doc = json!({"objectId": "p1", "copay": 20, "nested": {"b": 2, "a": 1}});
        assert_eq!(fingerprint(&doc), fingerprint(&doc));
    }

    #[test]
    fn key_order_does_not_change_the_fingerprint() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": {"p": true, "q": null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": {"q": null, "p": true}, "x": 1}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn any_field_difference_changes_the_fingerprint() {
        let a = json!({"objectId": "p1", "copay": 20});
        let b = json!({"objectId": "p1", "copay": 21});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({"items": [1, 2]});
        let b = json!({"items": [2, 1]});
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert!(!structurally_equal(&a, &b));
    }

    #[test]
    fn fingerprint_has_weak_validator_shape() {
        let tag = fingerprint(&json!({}));
        assert!(tag.starts_with("W/\""));
        assert!(tag.ends_with('"'));
        assert_eq!(tag.len(), "W/\"\"".len() + 32);
    }

    #[test]
    fn structural_equality_ignores_key_order_recursively() {
        let a: Value =
            serde_json::from_str(r#"{"svc": {"name": "well", "_org": "x"}, "copay": 1}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"copay": 1, "svc": {"_org": "x", "name": "well"}}"#).unwrap();
        assert!(structurally_equal(&a, &b));
        assert!(!structurally_equal(&a, &json!({"copay": 1})));
    }
}
