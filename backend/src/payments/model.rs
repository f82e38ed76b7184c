//! Payment models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::models::PaymentMethod;

/// Payment status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

/// Payment row. `idempotency_key` is unique: one key, one outcome, forever
/// (well, for 24 h of cache plus the row itself).
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub psp_ref: Option<String>,
    pub psp_response: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request DTO for processing a payment
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub trip_id: Uuid,

    pub payment_method: PaymentMethod,

    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
}

/// Request DTO for retrying a failed payment with a fresh key
#[derive(Debug, Deserialize, Validate)]
pub struct RetryPaymentRequest {
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
}

/// Request DTO for a refund
#[derive(Debug, Deserialize, Default)]
pub struct RefundPaymentRequest {
    pub reason: Option<String>,
}

/// Outcome of a payment request as seen by the HTTP layer
#[derive(Debug)]
pub enum PaymentOutcome {
    /// Final state reached (completed or failed)
    Settled(Payment),
    /// Another request holds the per-trip lock and no cached outcome exists
    /// yet; the caller should poll.
    InFlight,
}
