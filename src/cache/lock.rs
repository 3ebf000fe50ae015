//! Cache-stampede protection: a distributed lock when L2 is healthy,
//! degrading to a per-process mutex registry when it is not (§4.5's
//! "Shared-resource policy"). Either backend exposes the same `LockGuard`
//! so `TieredCache::get_or_compute` never has to branch on which one it
//! got.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use redis::Script;

/// Releases a lock previously acquired by [`LockBackend::try_acquire`] when
/// dropped, or explicitly via [`LockGuard::release`].
pub trait LockGuard: Send {
    fn release(self: Box<Self>);
}

pub trait LockBackend: Send + Sync {
    /// Attempt to acquire an exclusive lock on `key` for up to `lease`.
    /// Returns `None` if someone else already holds it.
    fn try_acquire(&self, key: &str, lease: Duration) -> Option<Box<dyn LockGuard>>;
}

/// `SET key token NX PX lease` with a Lua-scripted compare-and-delete
/// release, so a slow holder can never release a lock it no longer owns.
pub struct RedisLock {
    pool: r2d2::Pool<redis::Client>,
    release_script: Script,
}

impl RedisLock {
    pub fn new(pool: r2d2::Pool<redis::Client>) -> Self {
        Self {
            pool,
            release_script: Script::new(
                r#"
                if redis.call("GET", KEYS[1]) == ARGV[1] then
                    return redis.call("DEL", KEYS[1])
                else
                    return 0
                end
                "#,
            ),
        }
    }
}

struct RedisLockGuard {
    pool: r2d2::Pool<redis::Client>,
    script: Script,
    key: String,
    token: String,
}

impl LockGuard for RedisLockGuard {
    fn release(self: Box<Self>) {
        if let Ok(mut conn) = self.pool.get() {
            let _: redis::RedisResult<i64> = self
                .script
                .key(&self.key)
                .arg(&self.token)
                .invoke(&mut *conn);
        }
    }
}

impl Drop for RedisLockGuard {
    fn drop(&mut self) {
        if let Ok(mut conn) = self.pool.get() {
            let _: redis::RedisResult<i64> = self.script.key(&self.key).arg(&self.token).invoke(&mut *conn);
        }
    }
}

impl LockBackend for RedisLock {
    fn try_acquire(&self, key: &str, lease: Duration) -> Option<Box<dyn LockGuard>> {
        let mut conn = self.pool.get().ok()?;
        let token: String = {
            let mut rng = rand::thread_rng();
            (0..16).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
        };
        let lock_key = format!("geobank:lock:{key}");

        let acquired: bool = redis::cmd("SET")
            .arg(&lock_key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis().max(1) as u64)
            .query::<Option<String>>(&mut *conn)
            .ok()?
            .is_some();

        if !acquired {
            return None;
        }

        Some(Box::new(RedisLockGuard {
            pool: self.pool.clone(),
            script: self.release_script.clone(),
            key: lock_key,
            token,
        }))
    }
}

/// In-process fallback used when L2/Redis is unavailable. Guarantees
/// mutual exclusion only within this instance — acceptable under the
/// design's degraded-mode semantics, where stampede protection is
/// best-effort rather than a correctness requirement. A plain set of
/// currently-locked keys, rather than one mutex per key, since the lock
/// is held only for the duration of a loader call, never blocked on.
#[derive(Default)]
pub struct LocalLock {
    held: Arc<Mutex<HashMap<String, ()>>>,
}

struct LocalLockGuard {
    held: Arc<Mutex<HashMap<String, ()>>>,
    key: String,
}

impl LocalLockGuard {
    fn release_inner(&self) {
        self.held.lock().unwrap().remove(&self.key);
    }
}

impl LockGuard for LocalLockGuard {
    fn release(self: Box<Self>) {
        self.release_inner();
    }
}

impl Drop for LocalLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl LockBackend for LocalLock {
    fn try_acquire(&self, key: &str, _lease: Duration) -> Option<Box<dyn LockGuard>> {
        let mut registry = self.held.lock().unwrap();
        if registry.contains_key(key) {
            return None;
        }
        registry.insert(key.to_string(), ());
        drop(registry);
        Some(Box::new(LocalLockGuard {
            held: self.held.clone(),
            key: key.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_lock_rejects_concurrent_acquisition_of_same_key() {
        let lock = LocalLock::default();
        let first = lock.try_acquire("k", Duration::from_secs(1));
        assert!(first.is_some());
        assert!(lock.try_acquire("k", Duration::from_secs(1)).is_none());
    }

    #[test]
    fn local_lock_allows_reacquisition_after_release() {
        let lock = LocalLock::default();
        let guard = lock.try_acquire("k", Duration::from_secs(1)).unwrap();
        guard.release();
        assert!(lock.try_acquire("k", Duration::from_secs(1)).is_some());
    }

    #[test]
    fn local_lock_tracks_keys_independently() {
        let lock = LocalLock::default();
        let _a = lock.try_acquire("a", Duration::from_secs(1)).unwrap();
        assert!(lock.try_acquire("b", Duration::from_secs(1)).is_some());
    }
}
