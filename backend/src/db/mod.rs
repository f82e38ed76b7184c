//! Database connection and pool management for RideLink
//!
//! This module handles PostgreSQL connection pooling, migrations, and the
//! retry policy for transient transaction conflicts.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};

/// Database connection error
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Failed to connect to database: {0}")]
    ConnectionError(String),

    #[error("Failed to run migrations: {0}")]
    MigrationError(String),

    #[error("Database health check failed: {0}")]
    HealthCheckError(String),
}

/// Create a database connection pool
pub async fn create_pool(config: &Config) -> Result<PgPool, DbError> {
    tracing::info!("Connecting to database at {}", config.database_url_masked());

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.database_url)
        .await
        .map_err(|e| DbError::ConnectionError(e.to_string()))?;

    tracing::info!("Database connection pool created successfully");

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    tracing::info!("Running database migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DbError::MigrationError(e.to_string()))?;

    tracing::info!("Database migrations completed successfully");

    Ok(())
}

/// Check database connectivity (for health checks)
pub async fn check_health(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| DbError::HealthCheckError(e.to_string()))?;

    Ok(())
}

/// Retry an operation on serialization failures (40001) and deadlocks
/// (40P01), up to 3 attempts with linear backoff of 100/200/300 ms.
///
/// Business conflicts (lost row locks, invalid transitions) are never
/// retried; only [`ApiError::TxConflict`] qualifies.
pub async fn with_tx_retry<T, F, Fut>(mut op: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;

    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_tx_retryable() && attempt < MAX_ATTEMPTS => {
                attempt += 1;
                let backoff = Duration::from_millis(100 * u64::from(attempt));
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying transaction after conflict"
                );
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_tx_retry_passes_through_success() {
        let result: ApiResult<i32> = with_tx_retry(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_tx_retry_retries_tx_conflicts() {
        let calls = AtomicU32::new(0);
        let result: ApiResult<i32> = with_tx_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::TxConflict("serialization failure".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_tx_retry_does_not_retry_business_conflicts() {
        let calls = AtomicU32::new(0);
        let result: ApiResult<i32> = with_tx_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Conflict("already assigned".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
