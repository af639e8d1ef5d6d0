use core_domain::auth::{ApiKeyId, GroupId, RoleId, TenantId};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A stored api key row. An api key carries either a direct role or a
/// group, never both (§6 persisted-state section).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    pub id: ApiKeyId,
    pub tenant_id: TenantId,
    /// SHA-256 hex digest of the raw `mg_<hex>` key; this, not the raw
    /// key, is what gets stored and looked up.
    pub key_hash: String,
    pub role_id: Option<RoleId>,
    pub group_id: Option<GroupId>,
    pub active: bool,
}

/// Hash a raw api key for storage/lookup — SHA-256 of the raw key string,
/// hex-encoded.
pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new raw api key in the `mg_<hex>` form described in §6.
/// Uses two v4 UUIDs (32 random bytes total) rather than pulling in a
/// dedicated CSPRNG crate, since `uuid`'s v4 generator is already a
/// workspace dependency and sources its randomness from the OS.
pub fn generate_api_key() -> String {
    format!(
        "mg_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_has_mg_prefix() {
        let key = generate_api_key();
        assert!(key.starts_with("mg_"));
        assert_eq!(key.len(), "mg_".len() + 64);
    }

    #[test]
    fn hash_is_deterministic_and_64_hex_chars() {
        let key = "mg_deadbeef";
        let h1 = hash_api_key(key);
        let h2 = hash_api_key(key);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_keys_hash_differently() {
        assert_ne!(hash_api_key("mg_a"), hash_api_key("mg_b"));
    }
}
