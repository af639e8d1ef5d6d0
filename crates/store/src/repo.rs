use async_trait::async_trait;
use core_domain::auth::{ApiKeyId, GroupId, RoleId};
use core_domain::policy::RolePolicy;
use core_domain::usage::UsageRecord;

use crate::apikey::ApiKeyRecord;

/// Looks up api keys by their SHA-256 hash, as presented by the admission
/// layer after it strips the `Bearer`/`X-API-Key` prefix from the wire
/// token and hashes it.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn find_by_hash(&self, key_hash: &str) -> Option<ApiKeyRecord>;
}

/// Resolves a role id to its policy bundle.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn get_policy(&self, role_id: &RoleId) -> Option<RolePolicy>;
}

/// Resolves a group id to the role ids it inherits.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn get_role_ids(&self, group_id: &GroupId) -> Vec<RoleId>;
}

/// Durable sink for usage/accounting rows. Per §7, failures here are
/// logged and swallowed — they must never fail the request whose usage
/// they're recording.
#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn record(&self, record: UsageRecord);
}
