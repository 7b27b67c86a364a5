use sha2::{Digest, Sha256};
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

/// Serializes a [`Value`] to the smallest portable byte representation: object
/// keys sorted lexicographically, no insignificant whitespace, numbers
/// emitted without trailing zeros, strings normalized to NFC.
///
/// `serde_json::Value`'s default map type is already key-sorted (it is a
/// `BTreeMap` unless the `preserve_order` feature is enabled, which this
/// workspace does not enable), and `serde_json::to_vec` already emits
/// compact output with minimal float formatting -- the only thing this
/// function adds is recursive NFC normalization of string content before
/// handing off to `serde_json`.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let normalized = normalize(value);
    serde_json::to_vec(&normalized).expect("Value serialization is infallible")
}

/// SHA-256 of the canonical JSON encoding of `value`.
pub fn content_hash(value: &Value) -> String {
    let bytes = canonical_json(value);
    let digest = Sha256::digest(&bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.nfc().collect()),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.nfc().collect::<String>(), normalize(v))).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({ "b": 1, "a": 2 });
        let b = json!({ "a": 2, "b": 1 });
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn distinct_content_yields_distinct_hash() {
        let a = json!({ "resources": [] });
        let b = json!({ "resources": [{"type": "x"}] });
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn output_has_no_insignificant_whitespace() {
        let v = json!({ "a": [1, 2, 3] });
        let bytes = canonical_json(&v);
        let s = String::from_utf8(bytes).unwrap();
        assert_eq!(s, r#"{"a":[1,2,3]}"#);
    }

    #[test]
    fn same_value_hashes_identically_every_time() {
        let v = json!({ "resources": [{"type": "winget.package", "id": "putty"}] });
        assert_eq!(content_hash(&v), content_hash(&v));
    }
}
