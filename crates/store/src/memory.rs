use std::collections::HashMap;

use async_trait::async_trait;
use core_domain::auth::{ApiKeyId, GroupId, RoleId};
use core_domain::policy::RolePolicy;
use core_domain::usage::UsageRecord;
use parking_lot::RwLock;

use crate::apikey::ApiKeyRecord;
use crate::repo::{ApiKeyRepository, GroupRepository, RoleRepository, UsageRepository};

/// In-memory api-key store, keyed by key hash. Useful for tests and as
/// the default wiring ahead of a relational store.
#[derive(Default)]
pub struct InMemoryKeyRepository {
    by_hash: RwLock<HashMap<String, ApiKeyRecord>>,
}

impl InMemoryKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ApiKeyRecord) {
        self.by_hash.write().insert(record.key_hash.clone(), record);
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryKeyRepository {
    async fn find_by_hash(&self, key_hash: &str) -> Option<ApiKeyRecord> {
        self.by_hash.read().get(key_hash).cloned()
    }
}

/// In-memory role-policy store.
#[derive(Default)]
pub struct InMemoryRoleRepository {
    policies: RwLock<HashMap<String, RolePolicy>>,
}

impl InMemoryRoleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_policy(&self, role_id: &RoleId, policy: RolePolicy) {
        self.policies
            .write()
            .insert(role_id.as_str().to_string(), policy);
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn get_policy(&self, role_id: &RoleId) -> Option<RolePolicy> {
        self.policies.read().get(role_id.as_str()).cloned()
    }
}

/// In-memory group-membership store.
#[derive(Default)]
pub struct InMemoryGroupRepository {
    roles_by_group: RwLock<HashMap<String, Vec<RoleId>>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_roles(&self, group_id: &GroupId, role_ids: Vec<RoleId>) {
        self.roles_by_group
            .write()
            .insert(group_id.as_str().to_string(), role_ids);
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn get_role_ids(&self, group_id: &GroupId) -> Vec<RoleId> {
        self.roles_by_group
            .read()
            .get(group_id.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

/// In-memory usage sink, retaining the most recent rows in insertion
/// order (bounded, so a long-running dev instance cannot grow unbounded).
pub struct InMemoryUsageRepository {
    records: RwLock<Vec<UsageRecord>>,
    capacity: usize,
}

impl Default for InMemoryUsageRepository {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemoryUsageRepository {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            capacity,
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<UsageRecord> {
        let records = self.records.read();
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn by_api_key(&self, api_key_id: &ApiKeyId) -> Vec<UsageRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| &r.api_key_id == api_key_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UsageRepository for InMemoryUsageRepository {
    async fn record(&self, record: UsageRecord) {
        let mut records = self.records.write();
        records.push(record);
        if records.len() > self.capacity {
            let overflow = records.len() - self.capacity;
            records.drain(0..overflow);
        }
    }
}
