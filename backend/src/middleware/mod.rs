//! Middleware for the RideLink API
//!
//! Per-client rate limiting and the request pipeline (correlation ids,
//! timing, response hardening headers).

mod rate_limiter;
mod tracing;

pub use rate_limiter::{rate_limit, RateLimiter};
pub use tracing::request_tracing;
