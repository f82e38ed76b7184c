//! Offer expiry sweeper
//!
//! Periodic background task that moves pending offers past their deadline to
//! `expired`. Expired fan-outs leave the ride in MATCHING; re-matching is
//! caller-driven.

use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

/// Run the sweep loop. Intended for `tokio::spawn` at startup; never
/// returns.
pub async fn run_offer_sweeper(pool: PgPool, interval: Duration) {
    tracing::info!(interval_ms = interval.as_millis() as u64, "Offer sweeper started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match sweep_once(&pool).await {
            Ok(expired) if !expired.is_empty() => {
                tracing::info!(count = expired.len(), "Expired pending offers");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Offer sweep failed");
            }
        }
    }
}

/// Expire every pending offer whose deadline has passed; returns the ride
/// ids that had at least one offer expire.
pub async fn sweep_once(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE ride_offers
        SET status = 'expired'
        WHERE status = 'pending' AND expires_at < now()
        RETURNING ride_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut ride_ids: Vec<Uuid> = rows.into_iter().map(|(id,)| id).collect();
    ride_ids.dedup();
    Ok(ride_ids)
}
