//! Distributed lock with fence tokens
//!
//! Built on the cache's atomic SET-NX: each acquisition binds a random fence
//! token to the key for the duration of the lease. Release and extension run
//! compare scripts so a lock that expired and was reacquired by another
//! holder is never touched.

use redis::Script;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{Cache, CacheError};

/// Lock error
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Lock backend failed: {0}")]
    Backend(#[from] CacheError),
}

/// A held lock: key plus the fence token proving this acquisition
#[derive(Debug, Clone)]
pub struct Lock {
    pub key: String,
    pub token: String,
    pub lease: Duration,
}

/// Manager for fence-token locks
#[derive(Clone)]
pub struct LockManager {
    cache: Cache,
}

// Compare-and-delete: only the holder of the current token releases.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

// Compare-and-pexpire: only the holder of the current token extends.
const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

impl LockManager {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Try to acquire `key` for `lease`, retrying `attempts` times with a
    /// fixed `backoff` between tries. Returns `None` if every attempt found
    /// the lock held.
    pub async fn acquire(
        &self,
        key: &str,
        lease: Duration,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Option<Lock>, LockError> {
        let token = Uuid::new_v4().simple().to_string();

        for attempt in 0..attempts.max(1) {
            if self.cache.set_nx_px(key, &token, lease).await? {
                tracing::debug!(key, attempt, "Acquired distributed lock");
                return Ok(Some(Lock {
                    key: key.to_string(),
                    token,
                    lease,
                }));
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        tracing::debug!(key, attempts, "Failed to acquire distributed lock");
        Ok(None)
    }

    /// Release the lock if the fence token still matches. Returns true when
    /// this call actually deleted the key.
    pub async fn release(&self, lock: &Lock) -> Result<bool, LockError> {
        let mut conn = self.cache.connection();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(&lock.key)
            .arg(&lock.token)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            tracing::warn!(key = %lock.key, "Lock was no longer held at release");
        }
        Ok(deleted == 1)
    }

    /// Extend the lease if the fence token still matches
    pub async fn extend(&self, lock: &Lock, lease: Duration) -> Result<bool, LockError> {
        let mut conn = self.cache.connection();
        let extended: i64 = Script::new(EXTEND_SCRIPT)
            .key(&lock.key)
            .arg(&lock.token)
            .arg(lease.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }
}
