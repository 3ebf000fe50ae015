//! The distributed L2 tier: a namespaced, per-entry-TTL key-value store.
//! `RedisL2` is the production implementation; `NullL2` lets the cache run
//! L1-only (e.g. in tests, or as the permanent degraded state) without a
//! special case at every call site.

use crate::error::{GeoBankError, Result};
use std::time::Duration;

pub const KEY_PREFIX: &str = "geobank:";

/// Capability seam for the distributed cache tier.
pub trait L2Cache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    fn evict(&self, key: &str) -> Result<()>;
    /// Remove every key whose unprefixed name matches `pattern` (`*` is
    /// the only supported wildcard). Returns the number of keys removed.
    fn evict_by_pattern(&self, pattern: &str) -> Result<usize>;
    fn is_healthy(&self) -> bool;
}

fn namespaced(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

/// Redis-backed L2, connection-pooled via `r2d2`.
pub struct RedisL2 {
    pool: r2d2::Pool<redis::Client>,
}

impl RedisL2 {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| GeoBankError::CacheDegraded(format!("invalid redis url: {e}")))?;
        let pool = r2d2::Pool::builder()
            .build(client)
            .map_err(|e| GeoBankError::CacheDegraded(format!("redis pool init failed: {e}")))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: r2d2::Pool<redis::Client>) -> Self {
        Self { pool }
    }
}

impl L2Cache for RedisL2 {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| GeoBankError::CacheDegraded(e.to_string()))?;
        redis::cmd("GET")
            .arg(namespaced(key))
            .query(&mut *conn)
            .map_err(|e| GeoBankError::CacheDegraded(e.to_string()))
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| GeoBankError::CacheDegraded(e.to_string()))?;
        redis::cmd("SET")
            .arg(namespaced(key))
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query::<()>(&mut *conn)
            .map_err(|e| GeoBankError::CacheDegraded(e.to_string()))
    }

    fn evict(&self, key: &str) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| GeoBankError::CacheDegraded(e.to_string()))?;
        redis::cmd("DEL")
            .arg(namespaced(key))
            .query::<()>(&mut *conn)
            .map_err(|e| GeoBankError::CacheDegraded(e.to_string()))
    }

    fn evict_by_pattern(&self, pattern: &str) -> Result<usize> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| GeoBankError::CacheDegraded(e.to_string()))?;

        let scan_pattern = namespaced(pattern);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&scan_pattern)
                .arg("COUNT")
                .arg(200)
                .query(&mut *conn)
                .map_err(|e| GeoBankError::CacheDegraded(e.to_string()))?;

            if !keys.is_empty() {
                redis::cmd("DEL")
                    .arg(&keys)
                    .query::<()>(&mut *conn)
                    .map_err(|e| GeoBankError::CacheDegraded(e.to_string()))?;
                removed += keys.len();
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(removed)
    }

    fn is_healthy(&self) -> bool {
        self.pool
            .get()
            .ok()
            .and_then(|mut conn| redis::cmd("PING").query::<String>(&mut *conn).ok())
            .is_some()
    }
}

/// A no-op L2 — the cache degrades to L1-only permanently rather than
/// conditionally, useful for tests and single-node deployments.
pub struct NullL2;

impl L2Cache for NullL2 {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    fn evict(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn evict_by_pattern(&self, _pattern: &str) -> Result<usize> {
        Ok(0)
    }

    fn is_healthy(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_l2_always_misses_and_reports_unhealthy() {
        let l2 = NullL2;
        assert!(l2.get("k").unwrap().is_none());
        assert!(!l2.is_healthy());
        assert_eq!(l2.evict_by_pattern("nearest:*").unwrap(), 0);
    }
}
