//! Driver service layer
//!
//! Status changes maintain the geo index: going online re-adds the driver at
//! the last known location, going offline removes them. Busy is reserved for
//! the dispatch engine.

use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{self, Cache};
use crate::dispatch::RideOffer;
use crate::drivers::model::{CreateDriverRequest, Driver, DriverMeta, DriverStatus};
use crate::error::{ApiError, ApiResult};
use crate::geo::GeoIndex;
use crate::rides::{ListRidesQuery, Ride};

const DRIVER_CACHE_TTL: Duration = Duration::from_secs(300);

/// Driver service
pub struct DriverService {
    pool: PgPool,
    cache: Cache,
    geo: GeoIndex,
}

impl DriverService {
    pub fn new(pool: PgPool, cache: Cache, geo: GeoIndex) -> Self {
        Self { pool, cache, geo }
    }

    /// Create a driver (starts offline)
    pub async fn create(&self, request: CreateDriverRequest) -> ApiResult<Driver> {
        let driver = sqlx::query_as::<_, Driver>(
            r#"
            INSERT INTO drivers (tenant_id, phone, name, vehicle_id, vehicle_class)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(request.tenant_id)
        .bind(&request.phone)
        .bind(&request.name)
        .bind(&request.vehicle_id)
        .bind(request.vehicle_class.unwrap_or_default())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => {
                ApiError::Conflict("A driver with this phone already exists".to_string())
            }
            other => other,
        })?;

        tracing::info!(driver_id = %driver.id, tenant_id = %driver.tenant_id, "Driver created");
        Ok(driver)
    }

    /// Get a driver, read-through cached
    pub async fn get(&self, id: Uuid) -> ApiResult<Driver> {
        let key = cache::driver_key(id);
        if let Ok(Some(driver)) = self.cache.get_json::<Driver>(&key).await {
            return Ok(driver);
        }

        let driver = self.get_uncached(id).await?;

        if let Err(e) = self.cache.set_json(&key, &driver, DRIVER_CACHE_TTL).await {
            tracing::warn!(driver_id = %id, error = %e, "Failed to cache driver");
        }
        Ok(driver)
    }

    /// Get a driver straight from the database
    pub async fn get_uncached(&self, id: Uuid) -> ApiResult<Driver> {
        sqlx::query_as::<_, Driver>("SELECT * FROM drivers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Driver {} not found", id)))
    }

    /// Change a driver's availability. Guards:
    /// - `busy` cannot be requested through the API;
    /// - a busy driver (active ride) cannot flip status manually.
    pub async fn set_status(&self, id: Uuid, status: DriverStatus) -> ApiResult<Driver> {
        if status == DriverStatus::Busy {
            return Err(ApiError::BadRequest(
                "Driver status 'busy' is managed by dispatch".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let current =
            sqlx::query_as::<_, Driver>("SELECT * FROM drivers WHERE id = $1 FOR UPDATE NOWAIT")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("Driver {} not found", id)))?;

        if current.status == DriverStatus::Busy {
            return Err(ApiError::Conflict(
                "Driver has an active ride and cannot change status".to_string(),
            ));
        }

        let driver =
            sqlx::query_as::<_, Driver>("UPDATE drivers SET status = $2 WHERE id = $1 RETURNING *")
                .bind(id)
                .bind(status)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        // Maintain the geo index to match the new availability.
        match status {
            DriverStatus::Online => {
                if let Some((lat, lng)) = self.latest_location(id).await? {
                    if let Err(e) = self.geo.add_driver(driver.vehicle_class, id, lng, lat).await {
                        tracing::warn!(driver_id = %id, error = %e, "Failed to re-add driver to geo index");
                    }
                }
            }
            DriverStatus::Offline => {
                if let Err(e) = self.geo.remove_driver(driver.vehicle_class, id).await {
                    tracing::warn!(driver_id = %id, error = %e, "Failed to remove driver from geo index");
                }
            }
            DriverStatus::Busy => unreachable!("rejected above"),
        }

        self.invalidate_cache(id).await;

        tracing::info!(driver_id = %id, status = status.as_str(), "Driver status updated");
        Ok(driver)
    }

    /// The driver's current active ride, if any
    pub async fn current_ride(&self, driver_id: Uuid) -> ApiResult<Option<Ride>> {
        let ride = sqlx::query_as::<_, Ride>(
            r#"
            SELECT * FROM rides
            WHERE driver_id = $1
              AND status IN ('driver_assigned', 'driver_en_route', 'driver_arrived', 'in_progress')
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ride)
    }

    /// Pending, unexpired offers for the driver
    pub async fn pending_offers(&self, driver_id: Uuid) -> ApiResult<Vec<RideOffer>> {
        let offers = sqlx::query_as::<_, RideOffer>(
            r#"
            SELECT * FROM ride_offers
            WHERE driver_id = $1
              AND status = 'pending'
              AND expires_at > now()
            ORDER BY expires_at ASC
            "#,
        )
        .bind(driver_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(offers)
    }

    /// Paginated ride history for a driver
    pub async fn list_rides(&self, driver_id: Uuid, query: &ListRidesQuery) -> ApiResult<Vec<Ride>> {
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let offset = query.offset.unwrap_or(0).max(0);

        let rides = match query.status {
            Some(status) => {
                sqlx::query_as::<_, Ride>(
                    r#"
                    SELECT * FROM rides
                    WHERE driver_id = $1 AND status = $2
                    ORDER BY updated_at DESC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(driver_id)
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
                    WHERE driver_id = $1
                    ORDER BY updated_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(driver_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rides)
    }

    /// Latest persisted location sample for a driver
    pub async fn latest_location(&self, driver_id: Uuid) -> ApiResult<Option<(f64, f64)>> {
        let row: Option<(f64, f64)> = sqlx::query_as(
            r#"
            SELECT lat, lng FROM driver_locations
            WHERE driver_id = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Drop the driver's cache entries after a mutation
    pub async fn invalidate_cache(&self, id: Uuid) {
        let keys = vec![cache::driver_key(id), cache::driver_meta_key(id)];
        if let Err(e) = self.cache.del(&keys).await {
            tracing::warn!(driver_id = %id, error = %e, "Failed to invalidate driver cache");
        }
    }

    /// Rebuild the geo index from each online driver's latest sample. Run
    /// once at startup; the index is otherwise maintained incrementally.
    pub async fn restore_geo_index(&self) -> ApiResult<usize> {
        let rows: Vec<(Uuid, crate::models::VehicleClass, f64, f64)> = sqlx::query_as(
            r#"
            SELECT d.id, d.vehicle_class, l.lat, l.lng
            FROM drivers d
            JOIN LATERAL (
                SELECT lat, lng FROM driver_locations
                WHERE driver_id = d.id
                ORDER BY recorded_at DESC
                LIMIT 1
            ) l ON true
            WHERE d.status = 'online'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut restored = 0;
        for (id, class, lat, lng) in rows {
            match self.geo.add_driver(class, id, lng, lat).await {
                Ok(()) => restored += 1,
                Err(e) => tracing::warn!(driver_id = %id, error = %e, "Failed to restore driver position"),
            }
        }

        tracing::info!(restored, "Geo index restored from location history");
        Ok(restored)
    }

    /// Cached driver metadata for the telemetry hot path
    pub async fn meta(&self, id: Uuid) -> ApiResult<DriverMeta> {
        let key = cache::driver_meta_key(id);
        if let Ok(Some(meta)) = self.cache.get_json::<DriverMeta>(&key).await {
            return Ok(meta);
        }

        let driver = self.get_uncached(id).await?;
        let meta = DriverMeta::from(&driver);

        if let Err(e) = self.cache.set_json(&key, &meta, DRIVER_CACHE_TTL).await {
            tracing::warn!(driver_id = %id, error = %e, "Failed to cache driver meta");
        }
        Ok(meta)
    }
}
