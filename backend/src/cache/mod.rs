//! Typed Redis KV cache
//!
//! JSON-serialized get/set/del with TTL, pipelined multi-get, and the atomic
//! SET-NX primitive the distributed lock builds on. Write-through on mutation
//! paths; TTL-bounded everywhere else. Cached values are advisory: guard
//! checks always read the database.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Cache error
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to connect to Redis: {0}")]
    Connection(String),

    #[error("Cache command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Redis-backed typed KV cache
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    /// Connect to Redis and return a cache handle
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Get a JSON value; `None` on miss. Corrupt entries are dropped and
    /// treated as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            None => Ok(None),
            Some(s) => match serde_json::from_str(&s) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    tracing::warn!(key, error = %e, "Dropping undecodable cache entry");
                    let _: () = conn.del(key).await?;
                    Ok(None)
                }
            },
        }
    }

    /// Set a JSON value with a TTL
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value)?;
        let _: () = conn.set_ex(key, raw, ttl.as_secs()).await?;
        Ok(())
    }

    /// Delete keys (idempotent)
    pub async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    /// Pipelined multi-get of JSON values, positionally aligned with `keys`
    pub async fn mget_json<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<Vec<Option<T>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }
        let raws: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        Ok(raws
            .into_iter()
            .map(|raw| raw.and_then(|s| serde_json::from_str(&s).ok()))
            .collect())
    }

    /// Atomic `SET key value NX PX ttl`. Returns true when the key was set
    /// (i.e. it did not exist). The primitive under the distributed lock.
    pub async fn set_nx_px(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(outcome.is_some())
    }

    /// Liveness probe (PING)
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Raw connection handle for modules that need scripting (locks)
    pub(crate) fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

// Cache key helpers, kept in one place so invalidation sites stay honest.

pub fn ride_key(id: Uuid) -> String {
    format!("ride:{}", id)
}

pub fn driver_key(id: Uuid) -> String {
    format!("driver:{}", id)
}

pub fn rider_key(id: Uuid) -> String {
    format!("rider:{}", id)
}

pub fn driver_meta_key(id: Uuid) -> String {
    format!("driver:meta:{}", id)
}

pub fn payment_idempotency_key(key: &str) -> String {
    format!("payment:idempotency:{}", key)
}

pub fn ride_idempotency_key(key: &str) -> String {
    format!("ride:idempotency:{}", key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_helpers() {
        let id = Uuid::nil();
        assert_eq!(
            ride_key(id),
            "ride:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            driver_meta_key(id),
            "driver:meta:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(payment_idempotency_key("K1"), "payment:idempotency:K1");
    }
}
