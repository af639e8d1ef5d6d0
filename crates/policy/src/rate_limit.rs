use std::collections::{HashMap, VecDeque};

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Per-key request-rate and daily-token tracking backing the
/// `RateLimitPolicy` checks. One instance is shared across all requests
/// handled by a policy enforcer.
#[derive(Default)]
pub struct RateLimiter {
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
    tokens: Mutex<HashMap<String, DailyTokens>>,
}

struct DailyTokens {
    date: NaiveDate,
    used: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request for `key` and report whether the caller has
    /// exceeded `limit` requests within the trailing 60-second window.
    /// Returns `true` when the request is within the limit.
    pub fn check_and_record_request(&self, key: &str, limit_per_minute: u32) -> bool {
        let mut requests = self.requests.lock();
        let window = requests.entry(key.to_string()).or_default();
        let now = Instant::now();
        let cutoff = now - Duration::from_secs(60);
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
        if window.len() as u32 >= limit_per_minute {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Tokens used by `key` today, auto-resetting at UTC midnight.
    pub fn tokens_used_today(&self, key: &str) -> u64 {
        let tokens = self.tokens.lock();
        match tokens.get(key) {
            Some(t) if t.date == Utc::now().date_naive() => t.used,
            _ => 0,
        }
    }

    /// Whether recording `additional` tokens for `key` would stay within
    /// `limit` for the rest of today. Does not mutate state — callers
    /// check before the request, then call [`Self::add_tokens`] after
    /// usage is known.
    pub fn within_daily_budget(&self, key: &str, limit: u64) -> bool {
        self.tokens_used_today(key) < limit
    }

    pub fn add_tokens(&self, key: &str, amount: u64) {
        let mut tokens = self.tokens.lock();
        let today = Utc::now().date_naive();
        let entry = tokens.entry(key.to_string()).or_insert(DailyTokens {
            date: today,
            used: 0,
        });
        if entry.date != today {
            entry.date = today;
            entry.used = 0;
        }
        entry.used += amount;
    }
}
