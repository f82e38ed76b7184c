//! Rider service layer

use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{self, Cache};
use crate::error::{ApiError, ApiResult};
use crate::models::{CreateRiderRequest, Rider};
use crate::rides::{ListRidesQuery, Ride};

const RIDER_CACHE_TTL: Duration = Duration::from_secs(300);

/// Rider service
pub struct RiderService {
    pool: PgPool,
    cache: Cache,
}

impl RiderService {
    pub fn new(pool: PgPool, cache: Cache) -> Self {
        Self { pool, cache }
    }

    /// Create a rider. Phone numbers are globally unique; duplicates
    /// surface as 409.
    pub async fn create(&self, request: CreateRiderRequest) -> ApiResult<Rider> {
        let rider = sqlx::query_as::<_, Rider>(
            r#"
            INSERT INTO riders (tenant_id, phone, name, email)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(request.tenant_id)
        .bind(&request.phone)
        .bind(&request.name)
        .bind(&request.email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => {
                ApiError::Conflict("A rider with this phone already exists".to_string())
            }
            other => other,
        })?;

        tracing::info!(rider_id = %rider.id, tenant_id = %rider.tenant_id, "Rider created");
        Ok(rider)
    }

    /// Get a rider, read-through cached
    pub async fn get(&self, id: Uuid) -> ApiResult<Rider> {
        let key = cache::rider_key(id);
        if let Ok(Some(rider)) = self.cache.get_json::<Rider>(&key).await {
            return Ok(rider);
        }

        let rider = sqlx::query_as::<_, Rider>("SELECT * FROM riders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Rider {} not found", id)))?;

        if let Err(e) = self.cache.set_json(&key, &rider, RIDER_CACHE_TTL).await {
            tracing::warn!(rider_id = %id, error = %e, "Failed to cache rider");
        }
        Ok(rider)
    }

    /// The rider's current (non-terminal) ride, if any
    pub async fn current_ride(&self, rider_id: Uuid) -> ApiResult<Option<Ride>> {
        let ride = sqlx::query_as::<_, Ride>(
            r#"
            SELECT * FROM rides
            WHERE rider_id = $1
              AND status NOT IN ('completed', 'cancelled')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(rider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ride)
    }

    /// Paginated ride history, optionally filtered by status
    pub async fn list_rides(&self, rider_id: Uuid, query: &ListRidesQuery) -> ApiResult<Vec<Ride>> {
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let offset = query.offset.unwrap_or(0).max(0);

        let rides = match query.status {
            Some(status) => {
                sqlx::query_as::<_, Ride>(
                    r#"
                    SELECT * FROM rides
                    WHERE rider_id = $1 AND status = $2
                    ORDER BY created_at DESC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(rider_id)
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Ride>(
                    r#"
                    SELECT * FROM rides
                    WHERE rider_id = $1
                    ORDER BY created_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(rider_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rides)
    }
}
