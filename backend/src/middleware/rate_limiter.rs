//! Rate limiting middleware
//!
//! One refillable token bucket per client, keyed by the forwarded IP.
//! Throttled requests are rejected through [`ApiError::RateLimited`] so
//! they carry the same `{success, error}` envelope as every other error
//! path, with a Retry-After computed from the bucket deficit rather than a
//! fixed hint.

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::ApiError;

struct Bucket {
    tokens: f64,
    stamp: Instant,
}

/// Shared per-client rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, Bucket>>>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    /// Allow `requests_per_second` sustained per client, double that in
    /// bursts
    pub fn new(requests_per_second: u32) -> Self {
        let rate = f64::from(requests_per_second.max(1));
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            rate,
            burst: rate * 2.0,
        }
    }

    /// Take one token for `key`. On an empty bucket, `Err` carries the
    /// whole seconds until the next token becomes available.
    pub async fn acquire(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            stamp: now,
        });

        let elapsed = now.duration_since(bucket.stamp).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.stamp = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait_secs = (1.0 - bucket.tokens) / self.rate;
            Err(wait_secs.ceil().max(1.0) as u64)
        }
    }

    /// Drop buckets idle for longer than `max_idle` so the map stays
    /// bounded. Spawned as a periodic task at startup.
    pub async fn prune(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .write()
            .await
            .retain(|_, bucket| now.duration_since(bucket.stamp) < max_idle);
    }
}

/// Middleware entry point; wire with `axum::middleware::from_fn`
pub async fn rate_limit(limiter: RateLimiter, request: Request, next: Next) -> Response {
    let key = client_key(&request);

    match limiter.acquire(&key).await {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => {
            tracing::warn!(client = %key, retry_after_secs, "Rate limit exceeded");
            ApiError::RateLimited(retry_after_secs).into_response()
        }
    }
}

/// Client identity as the transport reports it: first non-empty hop in
/// `x-forwarded-for`, then `x-real-ip`
fn client_key(request: &Request) -> String {
    for header in ["x-forwarded-for", "x-real-ip"] {
        let Some(value) = request.headers().get(header).and_then(|h| h.to_str().ok()) else {
            continue;
        };
        if let Some(ip) = value.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return ip.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_reject_with_retry_hint() {
        let limiter = RateLimiter::new(5);

        for _ in 0..10 {
            assert!(limiter.acquire("client").await.is_ok());
        }

        let retry_after = limiter.acquire("client").await.unwrap_err();
        assert!(retry_after >= 1);
    }

    #[tokio::test]
    async fn test_clients_have_independent_buckets() {
        let limiter = RateLimiter::new(1);

        assert!(limiter.acquire("a").await.is_ok());
        assert!(limiter.acquire("b").await.is_ok());
        assert!(limiter.acquire("a").await.is_ok());
        assert!(limiter.acquire("b").await.is_ok());
        assert!(limiter.acquire("a").await.is_err());
    }

    #[tokio::test]
    async fn test_prune_drops_idle_buckets() {
        let limiter = RateLimiter::new(5);
        assert!(limiter.acquire("stale").await.is_ok());
        limiter.prune(Duration::ZERO).await;
        assert!(limiter.buckets.read().await.is_empty());
    }
}
