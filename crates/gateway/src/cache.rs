//! Semantic cache port (§4.5 step 2/8). "Semantic" is aspirational here —
//! this implementation is an exact-match cache keyed by a hash of the
//! canonicalized request, the same sha2-over-serialized-JSON approach used
//! for tool schema identity. A deployment that wants embedding-similarity
//! lookups swaps the `SemanticCache` implementation; the gateway service
//! only depends on the trait.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use core_domain::dispatch::ChatCompletionResult;
use core_domain::tool::Message;

/// Computes the cache key for a (profile, model, messages) tuple. Tool
/// calls are not part of the key — callers must not look up the cache for
/// requests carrying tool definitions, since tool-using responses are
/// never cached (§4.5 step 8).
pub fn cache_key(profile: &str, model: &str, messages: &[Message]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(profile.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    hasher.update(b"\0");
    if let Ok(json) = serde_json::to_string(messages) {
        hasher.update(json.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub trait SemanticCache: Send + Sync {
    fn get(&self, key: &str) -> Option<ChatCompletionResult>;
    fn put(&self, key: String, value: ChatCompletionResult, ttl: Duration);
}

struct Entry {
    value: ChatCompletionResult,
    expires_at: Instant,
}

/// In-memory cache with per-entry TTL. Expired entries are evicted lazily,
/// on the next `get` that finds them stale.
#[derive(Default)]
pub struct InMemorySemanticCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemorySemanticCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SemanticCache for InMemorySemanticCache {
    fn get(&self, key: &str) -> Option<ChatCompletionResult> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let mut value = entry.value.clone();
                value.cached = true;
                Some(value)
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: String, value: ChatCompletionResult, ttl: Duration) {
        self.entries.lock().insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_domain::dispatch::FinishReason;

    fn result(content: &str) -> ChatCompletionResult {
        ChatCompletionResult {
            content: Some(content.to_string()),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: None,
            cost_usd: 0.0,
            latency_ms: 0,
            provider_id: "test".to_string(),
            model: "gpt-4".to_string(),
            cached: false,
            stripped_tools: vec![],
        }
    }

    #[test]
    fn cache_key_is_stable_for_identical_input() {
        let msgs = vec![Message::user("hello")];
        assert_eq!(
            cache_key("default", "gpt-4", &msgs),
            cache_key("default", "gpt-4", &msgs)
        );
    }

    #[test]
    fn cache_key_differs_by_model() {
        let msgs = vec![Message::user("hello")];
        assert_ne!(
            cache_key("default", "gpt-4", &msgs),
            cache_key("default", "gpt-4o", &msgs)
        );
    }

    #[test]
    fn hit_marks_result_as_cached() {
        let cache = InMemorySemanticCache::new();
        cache.put("k".to_string(), result("hi"), Duration::from_secs(60));
        let hit = cache.get("k").unwrap();
        assert!(hit.cached);
        assert_eq!(hit.content.unwrap(), "hi");
    }

    #[test]
    fn expired_entry_is_evicted_and_misses() {
        let cache = InMemorySemanticCache::new();
        cache.put("k".to_string(), result("hi"), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = InMemorySemanticCache::new();
        assert!(cache.get("missing").is_none());
    }
}
