//! The in-process L1 tier: a size-bounded, per-entry-TTL cache backed by
//! `moka::sync::Cache`. Sub-millisecond access; concurrent by construction.

use std::time::{Duration, Instant};

#[derive(Clone)]
pub(super) struct Entry {
    pub(super) payload: String,
    stored_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn new(payload: String, ttl: Duration) -> Self {
        Self {
            payload,
            stored_at: Instant::now(),
            ttl,
        }
    }

    pub(super) fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }

    /// Fraction of TTL remaining, clamped to `[0, 1]`. Used by the
    /// probabilistic early-expiration check.
    pub(super) fn remaining_fraction(&self) -> f64 {
        if self.ttl.is_zero() {
            return 0.0;
        }
        let elapsed = self.stored_at.elapsed().as_secs_f64();
        let ttl = self.ttl.as_secs_f64();
        (1.0 - elapsed / ttl).clamp(0.0, 1.0)
    }

    pub(super) fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.stored_at.elapsed())
    }
}

pub(super) struct L1Cache {
    inner: moka::sync::Cache<String, Entry>,
}

impl L1Cache {
    pub(super) fn new(max_capacity: u64) -> Self {
        Self {
            inner: moka::sync::Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    pub(super) fn get(&self, key: &str) -> Option<Entry> {
        let entry = self.inner.get(key)?;
        if entry.is_expired() {
            self.inner.invalidate(key);
            return None;
        }
        Some(entry)
    }

    pub(super) fn put(&self, key: String, payload: String, ttl: Duration) {
        self.inner.insert(key, Entry::new(payload, ttl));
    }

    pub(super) fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    /// Local scan for pattern eviction — the only option for L1 since it
    /// has no server-side SCAN to delegate to.
    pub(super) fn invalidate_matching(&self, matches: impl Fn(&str) -> bool) -> usize {
        let keys: Vec<String> = self
            .inner
            .iter()
            .filter(|(k, _)| matches(k))
            .map(|(k, _)| k.as_str().to_string())
            .collect();
        for key in &keys {
            self.inner.invalidate(key);
        }
        keys.len()
    }

    pub(super) fn approximate_size(&self) -> usize {
        self.inner.entry_count() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_within_ttl() {
        let cache = L1Cache::new(100);
        cache.put("k".into(), "v".into(), Duration::from_secs(60));
        assert_eq!(cache.get("k").unwrap().payload, "v");
    }

    #[test]
    fn expired_entry_is_treated_as_a_miss() {
        let cache = L1Cache::new(100);
        cache.put("k".into(), "v".into(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn invalidate_matching_evicts_only_matched_keys() {
        let cache = L1Cache::new(100);
        cache.put("nearest:a".into(), "1".into(), Duration::from_secs(60));
        cache.put("branches:a".into(), "2".into(), Duration::from_secs(60));

        let evicted = cache.invalidate_matching(|k| k.starts_with("nearest:"));
        assert_eq!(evicted, 1);
        assert!(cache.get("nearest:a").is_none());
        assert!(cache.get("branches:a").is_some());
    }
}
