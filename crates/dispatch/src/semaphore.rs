//! Tenant Semaphore Table (§4.2): caps the number of requests a single
//! tenant may have in flight at once, independent of the shared priority
//! queues. Generalizes the per-session `Semaphore(1)` pattern used
//! elsewhere in this codebase to an N-slot counting semaphore keyed by
//! tenant, where N is resolved per-tenant by a pluggable tier lookup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use core_domain::auth::TenantId;
use core_domain::dispatch::TenantStats;

/// Resolves how many concurrent in-flight requests a tenant is entitled to.
/// A trait rather than a bare config map so a deployment can back this with
/// a billing-plan lookup instead of a static table.
pub trait TenantTierResolver: Send + Sync {
    fn concurrency_limit(&self, tenant_id: &TenantId) -> u32;
}

/// Every tenant gets the same default limit. The open question of "what
/// should an unconfigured tenant's cap be" is resolved here rather than in
/// the dispatcher itself, so a deployment can swap in a real tier lookup
/// without touching dispatch logic.
pub struct DefaultTierResolver {
    limit: u32,
}

impl DefaultTierResolver {
    pub const DEFAULT_LIMIT: u32 = 20;

    pub fn new(limit: u32) -> Self {
        Self { limit }
    }
}

impl Default for DefaultTierResolver {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT)
    }
}

impl TenantTierResolver for DefaultTierResolver {
    fn concurrency_limit(&self, _tenant_id: &TenantId) -> u32 {
        self.limit
    }
}

/// Per-tenant counting semaphores, created lazily on first sight of a
/// tenant and sized by `TenantTierResolver`.
pub struct TenantSemaphoreTable {
    resolver: Arc<dyn TenantTierResolver>,
    slots: Mutex<HashMap<TenantId, Arc<Semaphore>>>,
}

impl TenantSemaphoreTable {
    pub fn new(resolver: Arc<dyn TenantTierResolver>) -> Self {
        Self {
            resolver,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore_for(&self, tenant_id: &TenantId) -> Arc<Semaphore> {
        let mut slots = self.slots.lock();
        if let Some(sem) = slots.get(tenant_id) {
            return sem.clone();
        }
        let limit = self.resolver.concurrency_limit(tenant_id).max(1) as usize;
        let sem = Arc::new(Semaphore::new(limit));
        slots.insert(tenant_id.clone(), sem.clone());
        sem
    }

    /// Non-blocking acquire. The dispatcher never waits on this: a tenant
    /// at its cap is rejected with `TenantLimited` rather than queued, so
    /// one noisy tenant can't starve the shared priority queues.
    pub fn try_acquire(&self, tenant_id: &TenantId) -> Option<OwnedSemaphorePermit> {
        let sem = self.semaphore_for(tenant_id);
        sem.try_acquire_owned().ok()
    }

    pub fn stats(&self, tenant_id: &TenantId) -> TenantStats {
        let sem = self.semaphore_for(tenant_id);
        let limit = self.resolver.concurrency_limit(tenant_id);
        let available = sem.available_permits() as u32;
        TenantStats {
            tenant_id: tenant_id.as_str().to_string(),
            current: limit.saturating_sub(available),
            limit,
        }
    }

    /// Number of distinct tenants seen so far (monitoring only).
    pub fn tenant_count(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(s: &str) -> TenantId {
        TenantId::from(s)
    }

    #[test]
    fn grants_up_to_the_resolved_limit() {
        struct Fixed;
        impl TenantTierResolver for Fixed {
            fn concurrency_limit(&self, _: &TenantId) -> u32 {
                2
            }
        }
        let table = TenantSemaphoreTable::new(Arc::new(Fixed));
        let t = tenant("acme");
        let p1 = table.try_acquire(&t);
        let p2 = table.try_acquire(&t);
        let p3 = table.try_acquire(&t);
        assert!(p1.is_some());
        assert!(p2.is_some());
        assert!(p3.is_none(), "third acquire should be rejected at the cap");
    }

    #[test]
    fn releasing_a_permit_frees_a_slot() {
        struct Fixed;
        impl TenantTierResolver for Fixed {
            fn concurrency_limit(&self, _: &TenantId) -> u32 {
                1
            }
        }
        let table = TenantSemaphoreTable::new(Arc::new(Fixed));
        let t = tenant("acme");
        let p1 = table.try_acquire(&t).unwrap();
        assert!(table.try_acquire(&t).is_none());
        drop(p1);
        assert!(table.try_acquire(&t).is_some());
    }

    #[test]
    fn tenants_are_isolated_from_each_other() {
        let table = TenantSemaphoreTable::new(Arc::new(DefaultTierResolver::new(1)));
        let a = tenant("a");
        let b = tenant("b");
        let _pa = table.try_acquire(&a).unwrap();
        assert!(table.try_acquire(&b).is_some());
    }

    #[test]
    fn default_tier_resolver_uses_twenty() {
        let resolver = DefaultTierResolver::default();
        assert_eq!(resolver.concurrency_limit(&tenant("x")), 20);
    }

    #[test]
    fn stats_report_current_usage_against_limit() {
        let table = TenantSemaphoreTable::new(Arc::new(DefaultTierResolver::new(5)));
        let t = tenant("acme");
        let _p = table.try_acquire(&t).unwrap();
        let stats = table.stats(&t);
        assert_eq!(stats.limit, 5);
        assert_eq!(stats.current, 1);
    }
}
