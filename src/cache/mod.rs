//! The two-tier proximity cache (C5): an in-process L1 backed by a
//! distributed L2, with stampede protection on the read-through path and
//! probabilistic early expiration to smooth out synchronized TTL expiry.
//!
//! `TieredCache` is the only type query and registration engines depend
//! on; the [`Cache`] trait exists so tests can substitute a bare L1-only
//! instance without standing up Redis.

mod l1;
mod l2;
mod lock;

pub use l2::{L2Cache, NullL2, RedisL2};
pub use lock::{LocalLock, LockBackend, LockGuard, RedisLock};

use crate::error::{GeoBankError, Result};
use crate::metrics::{CacheMetrics, CacheMetricsCounters};
use l1::L1Cache;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::warn;

/// Fraction of remaining TTL below which a hit is probabilistically
/// treated as a miss, to spread out expirations of hot keys instead of
/// letting them all fall due at once. Overridable per `TieredCache`.
pub const DEFAULT_EARLY_EXPIRATION_FACTOR: f64 = 0.10;

/// Attempts to win the stampede lock before falling back to an uncached
/// direct call.
const LOCK_RETRY_ATTEMPTS: u32 = 3;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);
const LOCK_LEASE: Duration = Duration::from_secs(5);

/// Object-safe surface of the cache, for call sites and tests that don't
/// need the stampede-protected `get_or_compute` algorithm.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str, ttl: Duration);
    fn evict(&self, key: &str);
    fn evict_by_pattern(&self, pattern: &str) -> usize;
    fn metrics(&self) -> CacheMetrics;
    fn is_degraded(&self) -> bool;
}

/// Two-tier cache: L1 (in-process) in front of L2 (distributed), with
/// read-through stampede protection.
pub struct TieredCache {
    l1: L1Cache,
    l2: Arc<dyn L2Cache>,
    lock: Arc<dyn LockBackend>,
    metrics: CacheMetricsCounters,
    early_expiration_factor: f64,
    /// TTL given to an L1 entry populated from an L2 hit, since `L2Cache`
    /// doesn't expose the remaining TTL of the value it returned.
    l1_backfill_ttl: Duration,
}

impl TieredCache {
    pub fn new(l1_capacity: u64, l1_backfill_ttl: Duration, l2: Arc<dyn L2Cache>, lock: Arc<dyn LockBackend>) -> Self {
        Self {
            l1: L1Cache::new(l1_capacity),
            l2,
            lock,
            metrics: CacheMetricsCounters::default(),
            early_expiration_factor: DEFAULT_EARLY_EXPIRATION_FACTOR,
            l1_backfill_ttl,
        }
    }

    pub fn with_early_expiration_factor(mut self, factor: f64) -> Self {
        self.early_expiration_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// L1-only instance for tests and single-node deployments — L2 is a
    /// permanent, not conditional, miss.
    pub fn l1_only(l1_capacity: u64) -> Self {
        Self::new(
            l1_capacity,
            Duration::from_secs(30),
            Arc::new(NullL2),
            Arc::new(LocalLock::default()),
        )
    }

    /// Read-through lookup: L1, then L2 on an L1 miss, populating L1 on
    /// an L2 hit. Applies probabilistic early expiration to L1 hits only
    /// — an L1 entry nearing expiry is occasionally treated as a miss so
    /// a fraction of readers refresh it before every reader does at once.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.l1.get(key) {
            if self.should_treat_as_early_expiration(entry.remaining_fraction()) {
                self.metrics.record_early_expiration();
            } else {
                self.metrics.record_hit();
                return Some(entry.payload);
            }
        }

        match self.l2.get(key) {
            Ok(Some(value)) => {
                self.metrics.record_hit();
                self.l1.put(key.to_string(), value.clone(), self.l1_backfill_ttl);
                Some(value)
            }
            Ok(None) => {
                self.metrics.record_miss();
                None
            }
            Err(err) => {
                self.metrics.record_error();
                warn!(cache.key = key, error = %err, "CACHE_DEGRADED");
                None
            }
        }
    }

    fn should_treat_as_early_expiration(&self, remaining_fraction: f64) -> bool {
        if remaining_fraction >= self.early_expiration_factor {
            return false;
        }
        rand::thread_rng().gen_bool(0.5)
    }

    pub fn put(&self, key: &str, value: &str, ttl: Duration) {
        self.l1.put(key.to_string(), value.to_string(), ttl);
        if let Err(err) = self.l2.put(key, value, ttl) {
            self.metrics.record_error();
            warn!(cache.key = key, error = %err, "CACHE_DEGRADED");
        }
    }

    pub fn evict(&self, key: &str) {
        self.l1.invalidate(key);
        self.metrics.record_eviction(1);
        if let Err(err) = self.l2.evict(key) {
            self.metrics.record_error();
            warn!(cache.key = key, error = %err, "CACHE_INVALIDATION_FAILED");
        }
    }

    /// Evict every key matching `pattern` (`*` wildcard only) from both
    /// tiers. L1 always succeeds (local scan); an L2 failure is logged
    /// but not propagated — a stale L2 entry self-heals on next write.
    pub fn evict_by_pattern(&self, pattern: &str) -> usize {
        let glob = compile_glob(pattern);
        let l1_evicted = self.l1.invalidate_matching(|k| glob(k));
        let evicted = match self.l2.evict_by_pattern(pattern) {
            Ok(l2_evicted) => l1_evicted.max(l2_evicted),
            Err(err) => {
                self.metrics.record_error();
                warn!(pattern, error = %err, "CACHE_INVALIDATION_FAILED");
                l1_evicted
            }
        };
        self.metrics.record_eviction(evicted as u64);
        evicted
    }

    /// The C8 scheduler's fixed-interval "clear every `nearest:*` key"
    /// sweep (§4.5's Auto-renewal). Bounds staleness for answers whose
    /// targeted invalidation was missed.
    pub fn auto_renew(&self) -> usize {
        let evicted = self.evict_by_pattern("nearest:*");
        self.metrics.record_auto_renewal(SystemTime::now());
        evicted
    }

    /// Read-through with stampede protection: on a miss, only the caller
    /// that wins the distributed lock calls `loader`; everyone else
    /// re-probes the cache a bounded number of times before falling back
    /// to an uncached direct call.
    pub fn get_or_compute<F>(&self, key: &str, ttl: Duration, loader: F) -> Result<String>
    where
        F: Fn() -> Result<String>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }

        for attempt in 0..LOCK_RETRY_ATTEMPTS {
            match self.lock.try_acquire(key, LOCK_LEASE) {
                Some(guard) => {
                    self.metrics.record_lock_acquired();
                    // Someone may have populated the cache between our
                    // initial miss and winning the lock.
                    if let Some(hit) = self.get(key) {
                        guard.release();
                        return Ok(hit);
                    }
                    let value = loader();
                    let result = match value {
                        Ok(value) => {
                            self.put(key, &value, ttl);
                            Ok(value)
                        }
                        Err(err) => Err(err),
                    };
                    guard.release();
                    return result;
                }
                None => {
                    self.metrics.record_lock_contended();
                    if attempt + 1 < LOCK_RETRY_ATTEMPTS {
                        std::thread::sleep(LOCK_RETRY_DELAY);
                        if let Some(hit) = self.get(key) {
                            return Ok(hit);
                        }
                    }
                }
            }
        }

        warn!(cache.key = key, "CACHE_CONTENTION");
        loader()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot(self.l1.approximate_size())
    }

    pub fn is_degraded(&self) -> bool {
        !self.l2.is_healthy()
    }
}

impl Cache for TieredCache {
    fn get(&self, key: &str) -> Option<String> {
        TieredCache::get(self, key)
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) {
        TieredCache::put(self, key, value, ttl)
    }

    fn evict(&self, key: &str) {
        TieredCache::evict(self, key)
    }

    fn evict_by_pattern(&self, pattern: &str) -> usize {
        TieredCache::evict_by_pattern(self, pattern)
    }

    fn metrics(&self) -> CacheMetrics {
        TieredCache::metrics(self)
    }

    fn is_degraded(&self) -> bool {
        TieredCache::is_degraded(self)
    }
}

/// Compile a `*`-wildcard pattern into a matcher closure. The only
/// metacharacter supported is `*` (matches any run of characters,
/// including none); everything else matches literally.
fn compile_glob(pattern: &str) -> impl Fn(&str) -> bool {
    let segments: Vec<String> = pattern.split('*').map(|s| s.to_string()).collect();
    let anchored_start = !pattern.starts_with('*');
    let anchored_end = !pattern.ends_with('*');

    move |candidate: &str| -> bool {
        if segments.len() == 1 {
            return candidate == segments[0];
        }

        let mut rest = candidate;
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                continue;
            }
            if i == 0 && anchored_start {
                if !rest.starts_with(segment.as_str()) {
                    return false;
                }
                rest = &rest[segment.len()..];
            } else if i == segments.len() - 1 && anchored_end {
                if !rest.ends_with(segment.as_str()) {
                    return false;
                }
            } else {
                match rest.find(segment.as_str()) {
                    Some(pos) => rest = &rest[pos + segment.len()..],
                    None => return false,
                }
            }
        }
        true
    }
}
