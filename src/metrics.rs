//! Crate-wide counters. Lock-free so the hot read/write paths never
//! contend on a mutex just to bump a counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Point-in-time read of the cache's counters, per §4.5's "Metrics".
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub errors: u64,
    pub hit_ratio: f64,
    pub l1_size: usize,
    pub last_auto_renewal: Option<SystemTime>,
}

/// Atomic counters backing a [`CacheMetrics`] snapshot. `l1_size` isn't
/// tracked here — it's read live from the L1 tier when a snapshot is
/// taken, since moka already maintains an accurate entry count.
#[derive(Default)]
pub struct CacheMetricsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
    early_expirations: AtomicU64,
    stampede_locks_acquired: AtomicU64,
    stampede_locks_contended: AtomicU64,
    last_auto_renewal_epoch_secs: AtomicU64,
    last_auto_renewal_set: std::sync::atomic::AtomicBool,
}

impl CacheMetricsCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_early_expiration(&self) {
        self.early_expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_acquired(&self) {
        self.stampede_locks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_contended(&self) {
        self.stampede_locks_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_renewal(&self, at: SystemTime) {
        let secs = at.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        self.last_auto_renewal_epoch_secs.store(secs, Ordering::Relaxed);
        self.last_auto_renewal_set.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self, l1_size: usize) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_ratio = if total == 0 { 0.0 } else { hits as f64 / total as f64 };

        let last_auto_renewal = if self.last_auto_renewal_set.load(Ordering::Relaxed) {
            Some(
                std::time::UNIX_EPOCH
                    + std::time::Duration::from_secs(self.last_auto_renewal_epoch_secs.load(Ordering::Relaxed)),
            )
        } else {
            None
        };

        CacheMetrics {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_ratio,
            l1_size,
            last_auto_renewal,
        }
    }

    pub fn early_expirations(&self) -> u64 {
        self.early_expirations.load(Ordering::Relaxed)
    }

    pub fn stampede_locks_acquired(&self) -> u64 {
        self.stampede_locks_acquired.load(Ordering::Relaxed)
    }

    pub fn stampede_locks_contended(&self) -> u64 {
        self.stampede_locks_contended.load(Ordering::Relaxed)
    }
}
