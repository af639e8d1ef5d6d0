use sha2::{Digest, Sha256};

/// Deterministic hash over a canonicalized JSON parameter schema.
///
/// `serde_json::Map` is `BTreeMap`-backed in this workspace (the
/// `preserve_order` feature is not enabled), so object keys always
/// serialize in sorted order — two schemas that differ only in the
/// order their keys were written hash identically.
pub fn schema_hash(schema: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(schema).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_schemas_hash_equal() {
        let a = json!({"type": "object", "properties": {"q": {"type": "string"}}});
        let b = json!({"type": "object", "properties": {"q": {"type": "string"}}});
        assert_eq!(schema_hash(&a), schema_hash(&b));
    }

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(schema_hash(&a), schema_hash(&b));
    }

    #[test]
    fn different_schemas_hash_differently() {
        let a = json!({"type": "string"});
        let b = json!({"type": "number"});
        assert_ne!(schema_hash(&a), schema_hash(&b));
    }
}
