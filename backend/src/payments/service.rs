//! Payment service layer
//!
//! Exactly-once semantics over an at-least-once retry model. Three
//! independent safeguards: the unique constraint on `idempotency_key`, the
//! KV idempotency cache (24 h), and the per-trip distributed lock. Any two
//! are sufficient for correctness; together they keep the common case to a
//! single cache read.
//!
//! The PSP is invoked between two transactions: the `processing` upsert is
//! committed first so a crash mid-charge leaves an inspectable row, and no
//! database transaction is held across gateway latency.

use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::bus::{EventBus, NotificationEvent, NotificationRecord, TOPIC_NOTIFICATIONS};
use crate::cache::{self, Cache};
use crate::error::{ApiError, ApiResult};
use crate::lock::LockManager;
use crate::models::PaymentMethod;
use crate::payments::model::{Payment, PaymentOutcome, PaymentStatus};
use crate::payments::psp::MockPsp;
use crate::trips::fare::{round2, DRIVER_SHARE};

const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);

/// Trip context loaded for a charge
#[derive(Debug, sqlx::FromRow)]
struct TripBilling {
    trip_status: crate::trips::TripStatus,
    fare_total: Option<f64>,
    currency: String,
    rider_id: Uuid,
    driver_id: Option<Uuid>,
    ride_id: Uuid,
}

/// Payment service
pub struct PaymentService {
    pool: PgPool,
    cache: Cache,
    bus: EventBus,
    locks: LockManager,
    psp: MockPsp,
    lock_lease: Duration,
}

impl PaymentService {
    pub fn new(
        pool: PgPool,
        cache: Cache,
        bus: EventBus,
        locks: LockManager,
        psp: MockPsp,
        lock_lease: Duration,
    ) -> Self {
        Self {
            pool,
            cache,
            bus,
            locks,
            psp,
            lock_lease,
        }
    }

    /// Get a payment by id
    pub async fn get(&self, id: Uuid) -> ApiResult<Payment> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Payment {} not found", id)))
    }

    /// Process a charge for a completed trip. For the same idempotency key
    /// the outcome is identical and at most one charge is ever issued.
    pub async fn process(
        &self,
        trip_id: Uuid,
        method: PaymentMethod,
        idempotency_key: &str,
    ) -> ApiResult<PaymentOutcome> {
        let idem_key = cache::payment_idempotency_key(idempotency_key);

        // Fast path: this exact request already ran.
        if let Ok(Some(payment)) = self.cache.get_json::<Payment>(&idem_key).await {
            tracing::debug!(trip_id = %trip_id, "Payment replayed from idempotency cache");
            return Ok(PaymentOutcome::Settled(payment));
        }

        let lock_key = format!("payment_lock:{}", trip_id);
        let lock = self
            .locks
            .acquire(&lock_key, self.lock_lease, 1, Duration::ZERO)
            .await
            .map_err(|e| ApiError::ServiceUnavailable(format!("Lock backend: {}", e)))?;

        let Some(lock) = lock else {
            // Someone else is charging this trip. Give them a beat, then
            // either return their cached outcome or report in-flight.
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(Some(payment)) = self.cache.get_json::<Payment>(&idem_key).await {
                return Ok(PaymentOutcome::Settled(payment));
            }
            return Ok(PaymentOutcome::InFlight);
        };

        let result = self
            .process_locked(trip_id, method, idempotency_key, &idem_key)
            .await;

        if let Err(e) = self.locks.release(&lock).await {
            tracing::warn!(trip_id = %trip_id, error = %e, "Failed to release payment lock");
        }

        result
    }

    async fn process_locked(
        &self,
        trip_id: Uuid,
        method: PaymentMethod,
        idempotency_key: &str,
        idem_key: &str,
    ) -> ApiResult<PaymentOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE trip_id = $1 FOR UPDATE")
                .bind(trip_id)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(payment) = &existing {
            match payment.status {
                PaymentStatus::Completed => {
                    // Already charged: cache and return verbatim.
                    tx.commit().await?;
                    self.cache_outcome(idem_key, payment).await;
                    return Ok(PaymentOutcome::Settled(payment.clone()));
                }
                PaymentStatus::Refunded => {
                    return Err(ApiError::Conflict(
                        "Payment was already refunded".to_string(),
                    ));
                }
                PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Failed => {}
            }
        }

        let billing = sqlx::query_as::<_, TripBilling>(
            r#"
            SELECT t.status AS trip_status, t.fare_total, t.currency,
                   r.rider_id, r.driver_id, r.id AS ride_id
            FROM trips t
            JOIN rides r ON r.id = t.ride_id
            WHERE t.id = $1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Trip {} not found", trip_id)))?;

        if billing.trip_status != crate::trips::TripStatus::Completed {
            return Err(ApiError::Conflict(
                "Payment requires a completed trip".to_string(),
            ));
        }
        let amount = billing
            .fare_total
            .ok_or_else(|| ApiError::Internal("Completed trip has no fare".to_string()))?;

        let payment = match existing {
            Some(_) => {
                sqlx::query_as::<_, Payment>(
                    r#"
                    UPDATE payments
                    SET status = 'processing', method = $2, idempotency_key = $3,
                        psp_ref = NULL, psp_response = NULL, error_code = NULL
                    WHERE trip_id = $1
                    RETURNING *
                    "#,
                )
                .bind(trip_id)
                .bind(method)
                .bind(idempotency_key)
                .fetch_one(&mut *tx)
                .await
            }
            None => {
                sqlx::query_as::<_, Payment>(
                    r#"
                    INSERT INTO payments (trip_id, amount, currency, method, status, idempotency_key)
                    VALUES ($1, $2, $3, $4, 'processing', $5)
                    RETURNING *
                    "#,
                )
                .bind(trip_id)
                .bind(amount)
                .bind(&billing.currency)
                .bind(method)
                .bind(idempotency_key)
                .fetch_one(&mut *tx)
                .await
            }
        }
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => ApiError::IdempotencyConflict(
                "Idempotency key is already bound to another payment".to_string(),
            ),
            other => other,
        })?;

        tx.commit().await?;

        // Gateway call happens outside any transaction.
        let outcome = self.psp.charge(method, amount).await;
        let status = if outcome.success {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        };
        let completed_at = outcome.success.then(chrono::Utc::now);

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = $2, psp_ref = $3, psp_response = $4, error_code = $5,
                completed_at = $6
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payment.id)
        .bind(status)
        .bind(&outcome.reference)
        .bind(&outcome.response)
        .bind(&outcome.error_code)
        .bind(completed_at)
        .fetch_one(&self.pool)
        .await?;

        self.cache_outcome(idem_key, &payment).await;
        self.invalidate_party_caches(&billing).await;

        if payment.status == PaymentStatus::Completed {
            self.publish_settlement(&payment, &billing).await;
        }

        tracing::info!(
            payment_id = %payment.id,
            trip_id = %trip_id,
            status = ?payment.status,
            amount,
            "Payment settled"
        );
        Ok(PaymentOutcome::Settled(payment))
    }

    /// Retry a failed payment under a fresh idempotency key
    pub async fn retry(&self, payment_id: Uuid, new_key: &str) -> ApiResult<PaymentOutcome> {
        let payment = self.get(payment_id).await?;

        if payment.status != PaymentStatus::Failed {
            return Err(ApiError::Conflict(
                "Only failed payments can be retried".to_string(),
            ));
        }
        if payment.idempotency_key == new_key {
            return Err(ApiError::IdempotencyConflict(
                "Retry requires a new idempotency key".to_string(),
            ));
        }

        self.process(payment.trip_id, payment.method, new_key).await
    }

    /// Refund a completed, non-cash payment
    pub async fn refund(&self, payment_id: Uuid, reason: Option<String>) -> ApiResult<Payment> {
        let mut tx = self.pool.begin().await?;

        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
                .bind(payment_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("Payment {} not found", payment_id)))?;

        if payment.status != PaymentStatus::Completed {
            return Err(ApiError::Conflict(
                "Only completed payments can be refunded".to_string(),
            ));
        }
        if payment.method == PaymentMethod::Cash {
            return Err(ApiError::BadRequest(
                "Cash payments cannot be refunded".to_string(),
            ));
        }

        let refund_meta = json!({
            "refund": {
                "reference": format!("REFUND-{}", chrono::Utc::now().timestamp_millis()),
                "reason": reason,
                "refunded_at": chrono::Utc::now(),
            }
        });

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'refunded',
                psp_response = COALESCE(psp_response, '{}'::jsonb) || $2::jsonb
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(&refund_meta)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        // Keep the idempotency cache aligned with the terminal state.
        let idem_key = cache::payment_idempotency_key(&payment.idempotency_key);
        self.cache_outcome(&idem_key, &payment).await;

        tracing::info!(payment_id = %payment_id, "Payment refunded");
        Ok(payment)
    }

    async fn cache_outcome(&self, idem_key: &str, payment: &Payment) {
        if let Err(e) = self.cache.set_json(idem_key, payment, IDEMPOTENCY_TTL).await {
            tracing::warn!(payment_id = %payment.id, error = %e, "Failed to cache payment outcome");
        }
    }

    async fn invalidate_party_caches(&self, billing: &TripBilling) {
        let mut keys = vec![
            cache::ride_key(billing.ride_id),
            cache::rider_key(billing.rider_id),
        ];
        if let Some(driver_id) = billing.driver_id {
            keys.push(cache::driver_key(driver_id));
        }
        if let Err(e) = self.cache.del(&keys).await {
            tracing::warn!(error = %e, "Failed to invalidate caches after payment");
        }
    }

    async fn publish_settlement(&self, payment: &Payment, billing: &TripBilling) {
        let rider_note = NotificationRecord::new(
            billing.rider_id,
            NotificationEvent::PaymentCompleted {
                rider_id: billing.rider_id,
                payment_id: payment.id,
                amount: payment.amount,
                currency: payment.currency.clone(),
            },
        );
        self.bus
            .publish_best_effort(
                TOPIC_NOTIFICATIONS,
                &billing.rider_id.to_string(),
                &rider_note,
            )
            .await;

        if let Some(driver_id) = billing.driver_id {
            let driver_note = NotificationRecord::new(
                driver_id,
                NotificationEvent::PaymentReceived {
                    driver_id,
                    payment_id: payment.id,
                    amount: round2(payment.amount * DRIVER_SHARE),
                    currency: payment.currency.clone(),
                },
            );
            self.bus
                .publish_best_effort(TOPIC_NOTIFICATIONS, &driver_id.to_string(), &driver_note)
                .await;
        }
    }
}
