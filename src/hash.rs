//! Deterministic content hashing over canonically serialized values.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonicalize a `serde_json::Value` by recursively sorting object keys.
/// Arrays keep their order (order is significant for our payloads).
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` into its canonical byte encoding: sorted-key JSON.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    let raw = serde_json::to_value(value).expect("value must be JSON-serializable");
    let canonical = canonicalize(&raw);
    serde_json::to_vec(&canonical).expect("canonicalized value must serialize")
}

/// Hash `value` to a 64-character lowercase hex SHA-256 digest, computed over
/// its canonical byte encoding. Equal structured values (same keys, same
/// values, any key order) always hash equal.
pub fn hash<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(value));
    hex::encode(hasher.finalize())
}

/// Returns true if `candidate` is a well-formed 64 lowercase hex digest.
pub fn is_valid_content_hash(candidate: &str) -> bool {
    candidate.len() == 64 && candidate.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_deterministic() {
        let a = json!({"resource": "companies", "action": "update", "data": {"name": "Acme"}});
        let b = a.clone();
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn hash_ignores_key_order() {
        let a = json!({"a": 1, "b": 2, "c": {"x": 1, "y": 2}});
        let b = json!({"c": {"y": 2, "x": 1}, "b": 2, "a": 1});
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn hash_distinguishes_distinct_values() {
        let a = json!({"resource": "companies", "action": "update", "data": {"name": "Acme"}});
        let b = json!({"resource": "companies", "action": "update", "data": {"name": "Acme Inc"}});
        assert_ne!(hash(&a), hash(&b));
    }

    #[test]
    fn hash_output_is_valid_content_hash() {
        let h = hash(&json!({"k": "v"}));
        assert!(is_valid_content_hash(&h));
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({"items": [1, 2, 3]});
        let b = json!({"items": [3, 2, 1]});
        assert_ne!(hash(&a), hash(&b));
    }
}
