//! API handlers for the `/v1` surface
//!
//! Handlers validate DTOs, delegate to services, and wrap results in the
//! standard response envelope. Errors surface through [`crate::error::ApiError`].

mod drivers;
mod payments;
mod riders;
mod rides;
mod tenants;
mod trips;

pub use drivers::*;
pub use payments::*;
pub use riders::*;
pub use rides::*;
pub use tenants::*;
pub use trips::*;

use axum::http::HeaderMap;

/// Pull the `Idempotency-Key` header, if present
pub(crate) fn idempotency_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("idempotency-key")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}
