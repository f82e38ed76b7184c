//! Ride service layer: the lifecycle state machine
//!
//! Every mutation reads the ride row under FOR UPDATE NOWAIT, validates the
//! transition table, and writes `(status, version + 1)` in one statement.
//! Guard checks never trust cached state. Side-effect publishes happen after
//! commit and are best-effort; the committed row is authoritative.

use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::bus::{
    EventBus, NotificationEvent, NotificationRecord, RideEventRecord, RideEventType,
    TOPIC_NOTIFICATIONS, TOPIC_RIDE_EVENTS,
};
use crate::cache::{self, Cache};
use crate::db::with_tx_retry;
use crate::error::{ApiError, ApiResult};
use crate::geo::{haversine_km, GeoIndex};
use crate::models::GeoPoint;
use crate::rides::model::{CreateRideRequest, Ride, RideStatus};
use crate::simulator::{SimRide, SimulatorRegistry};
use crate::trips::fare;

const RIDE_CACHE_TTL: Duration = Duration::from_secs(60);
const RIDE_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);

/// Assumed city speed for duration estimates, km/h
const ESTIMATE_SPEED_KMH: f64 = 30.0;

/// Ride service
pub struct RideService {
    pool: PgPool,
    cache: Cache,
    bus: EventBus,
    geo: GeoIndex,
    sims: Arc<SimulatorRegistry>,
}

impl RideService {
    pub fn new(
        pool: PgPool,
        cache: Cache,
        bus: EventBus,
        geo: GeoIndex,
        sims: Arc<SimulatorRegistry>,
    ) -> Self {
        Self {
            pool,
            cache,
            bus,
            geo,
            sims,
        }
    }

    /// Create a ride in REQUESTED with straight-line estimates. When an
    /// idempotency key is supplied, a repeated request returns the ride the
    /// first request created.
    pub async fn create(
        &self,
        request: CreateRideRequest,
        idempotency_key: Option<String>,
    ) -> ApiResult<Ride> {
        if let Some(key) = idempotency_key.as_deref() {
            let cache_key = cache::ride_idempotency_key(key);
            if let Ok(Some(ride_id)) = self.cache.get_json::<Uuid>(&cache_key).await {
                tracing::debug!(%ride_id, key, "Ride creation replayed from idempotency cache");
                return self.get_uncached(ride_id).await;
            }
        }

        // Rider must exist and belong to the requesting tenant.
        let rider_tenant: Option<Uuid> =
            sqlx::query_scalar("SELECT tenant_id FROM riders WHERE id = $1")
                .bind(request.rider_id)
                .fetch_optional(&self.pool)
                .await?;
        match rider_tenant {
            None => {
                return Err(ApiError::NotFound(format!(
                    "Rider {} not found",
                    request.rider_id
                )))
            }
            Some(t) if t != request.tenant_id => {
                return Err(ApiError::Forbidden(
                    "Rider does not belong to this tenant".to_string(),
                ))
            }
            Some(_) => {}
        }

        let tier = request.tier.unwrap_or_default();
        let distance_km = haversine_km(
            request.pickup_lat,
            request.pickup_lng,
            request.dropoff_lat,
            request.dropoff_lng,
        );
        let duration_mins = (distance_km / ESTIMATE_SPEED_KMH * 60.0).ceil() as i32;
        let estimated_fare = fare::estimate_fare(tier, distance_km);

        let ride = sqlx::query_as::<_, Ride>(
            r#"
            INSERT INTO rides (
                tenant_id, rider_id, pickup_lat, pickup_lng, pickup_address,
                dropoff_lat, dropoff_lng, dropoff_address, tier, payment_method,
                estimated_fare, estimated_distance_km, estimated_duration_mins
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(request.tenant_id)
        .bind(request.rider_id)
        .bind(request.pickup_lat)
        .bind(request.pickup_lng)
        .bind(&request.pickup_address)
        .bind(request.dropoff_lat)
        .bind(request.dropoff_lng)
        .bind(&request.dropoff_address)
        .bind(tier)
        .bind(request.payment_method.unwrap_or_default())
        .bind(estimated_fare)
        .bind(distance_km)
        .bind(duration_mins)
        .fetch_one(&self.pool)
        .await?;

        if let Some(key) = idempotency_key.as_deref() {
            let cache_key = cache::ride_idempotency_key(key);
            if let Err(e) = self
                .cache
                .set_json(&cache_key, &ride.id, RIDE_IDEMPOTENCY_TTL)
                .await
            {
                tracing::warn!(ride_id = %ride.id, error = %e, "Failed to cache ride idempotency key");
            }
        }

        self.write_through(&ride).await;
        self.publish_lifecycle(&ride, None, RideEventType::RideCreated)
            .await;

        tracing::info!(
            ride_id = %ride.id,
            tenant_id = %ride.tenant_id,
            rider_id = %ride.rider_id,
            distance_km = format!("{distance_km:.2}"),
            "Ride created"
        );
        Ok(ride)
    }

    /// Get a ride, read-through cached. Cached values are advisory only.
    pub async fn get(&self, id: Uuid) -> ApiResult<Ride> {
        let key = cache::ride_key(id);
        if let Ok(Some(ride)) = self.cache.get_json::<Ride>(&key).await {
            return Ok(ride);
        }

        let ride = self.get_uncached(id).await?;
        self.write_through(&ride).await;
        Ok(ride)
    }

    /// Get a ride straight from the database
    pub async fn get_uncached(&self, id: Uuid) -> ApiResult<Ride> {
        sqlx::query_as::<_, Ride>("SELECT * FROM rides WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Ride {} not found", id)))
    }

    /// Driver-progress transition: DRIVER_EN_ROUTE or DRIVER_ARRIVED. All
    /// other statuses move through their dedicated operations (dispatch,
    /// trips, cancel).
    pub async fn progress(
        &self,
        ride_id: Uuid,
        target: RideStatus,
        expected_version: Option<i32>,
    ) -> ApiResult<Ride> {
        if !matches!(
            target,
            RideStatus::DriverEnRoute | RideStatus::DriverArrived
        ) {
            return Err(ApiError::InvalidStateTransition(format!(
                "Status {} cannot be set directly",
                target.as_str()
            )));
        }

        let (old, ride) = self
            .guarded_update(ride_id, target, expected_version)
            .await?;

        self.write_through(&ride).await;
        self.publish_lifecycle(&ride, Some(old), RideEventType::RideStatusChanged)
            .await;

        // Room-scoped progress notifications, keyed by the rider for
        // per-user FIFO.
        let event = match target {
            RideStatus::DriverEnRoute => NotificationEvent::RideDriverEnRoute { ride_id },
            RideStatus::DriverArrived => NotificationEvent::RideDriverArrived { ride_id },
            _ => unreachable!("guarded above"),
        };
        self.bus
            .publish_best_effort(
                TOPIC_NOTIFICATIONS,
                &ride.rider_id.to_string(),
                &NotificationRecord::new(ride.rider_id, event),
            )
            .await;

        Ok(ride)
    }

    /// Cancel a ride. Allowed from any non-terminal state except
    /// IN_PROGRESS. If a driver was assigned, they are released back to
    /// online, re-indexed at their last known position, and their motion
    /// task is stopped.
    pub async fn cancel(&self, ride_id: Uuid, reason: Option<String>) -> ApiResult<Ride> {
        let outcome = with_tx_retry(|| {
            let reason = reason.clone();
            async move {
                let mut tx = self.pool.begin().await?;

                let current = sqlx::query_as::<_, Ride>(
                    "SELECT * FROM rides WHERE id = $1 FOR UPDATE NOWAIT",
                )
                .bind(ride_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("Ride {} not found", ride_id)))?;

                if !current.status.is_cancellable() {
                    return Err(if current.status == RideStatus::InProgress {
                        ApiError::InvalidStateTransition(
                            "A ride in progress must complete".to_string(),
                        )
                    } else {
                        ApiError::InvalidStateTransition(format!(
                            "Ride is already {}",
                            current.status.as_str()
                        ))
                    });
                }

                let ride = sqlx::query_as::<_, Ride>(
                    r#"
                    UPDATE rides
                    SET status = 'cancelled',
                        cancelled_at = now(),
                        cancel_reason = $2,
                        version = version + 1
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(ride_id)
                .bind(&reason)
                .fetch_one(&mut *tx)
                .await?;

                // Unresolved offers die with the ride.
                sqlx::query(
                    r#"
                    UPDATE ride_offers
                    SET status = 'cancelled', responded_at = now()
                    WHERE ride_id = $1 AND status = 'pending'
                    "#,
                )
                .bind(ride_id)
                .execute(&mut *tx)
                .await?;

                if current.driver_id.is_some() {
                    sqlx::query("UPDATE drivers SET status = 'online' WHERE id = $1")
                        .bind(current.driver_id)
                        .execute(&mut *tx)
                        .await?;
                }

                tx.commit().await?;
                Ok((current.status, ride))
            }
        })
        .await?;
        let (old, ride) = outcome;

        if let Some(driver_id) = ride.driver_id {
            self.sims.stop(driver_id).await;
            self.release_driver_to_index(driver_id).await;
            if let Err(e) = self.cache.del(&[cache::driver_key(driver_id)]).await {
                tracing::warn!(%driver_id, error = %e, "Failed to invalidate driver cache");
            }
        }

        self.write_through(&ride).await;
        if let Err(e) = self.cache.del(&[cache::rider_key(ride.rider_id)]).await {
            tracing::warn!(rider_id = %ride.rider_id, error = %e, "Failed to invalidate rider cache");
        }

        self.publish_lifecycle(&ride, Some(old), RideEventType::RideCancelled)
            .await;

        tracing::info!(
            ride_id = %ride.id,
            old_status = old.as_str(),
            reason = reason.as_deref().unwrap_or(""),
            "Ride cancelled"
        );
        Ok(ride)
    }

    /// Internal guarded transition shared by the lifecycle operations
    async fn guarded_update(
        &self,
        ride_id: Uuid,
        target: RideStatus,
        expected_version: Option<i32>,
    ) -> ApiResult<(RideStatus, Ride)> {
        with_tx_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let current =
                sqlx::query_as::<_, Ride>("SELECT * FROM rides WHERE id = $1 FOR UPDATE NOWAIT")
                    .bind(ride_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("Ride {} not found", ride_id)))?;

            if let Some(expected) = expected_version {
                if current.version != expected {
                    return Err(ApiError::Conflict(format!(
                        "Version mismatch: expected {}, found {}",
                        expected, current.version
                    )));
                }
            }

            if !current.status.can_transition_to(target) {
                return Err(ApiError::InvalidStateTransition(format!(
                    "Cannot move ride from {} to {}",
                    current.status.as_str(),
                    target.as_str()
                )));
            }

            let ride = sqlx::query_as::<_, Ride>(
                "UPDATE rides SET status = $2, version = version + 1 WHERE id = $1 RETURNING *",
            )
            .bind(ride_id)
            .bind(target)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok((current.status, ride))
        })
        .await
    }

    /// Move a ride between REQUESTED and MATCHING on behalf of the dispatch
    /// engine. Awaited before any offer is written so consumers never see
    /// offers for a ride the store still shows as REQUESTED.
    pub async fn set_matching(&self, ride_id: Uuid, entering: bool) -> ApiResult<Ride> {
        let target = if entering {
            RideStatus::Matching
        } else {
            RideStatus::Requested
        };
        let (old, ride) = self.guarded_update(ride_id, target, None).await?;

        self.write_through(&ride).await;
        if old != ride.status {
            self.publish_lifecycle(&ride, Some(old), RideEventType::RideStatusChanged)
                .await;
        }
        Ok(ride)
    }

    /// Re-add a released driver to the geo index at their last known
    /// position, if one exists
    async fn release_driver_to_index(&self, driver_id: Uuid) {
        let row: Result<Option<(crate::models::VehicleClass, f64, f64)>, sqlx::Error> =
            sqlx::query_as(
                r#"
                SELECT d.vehicle_class, l.lat, l.lng
                FROM drivers d
                JOIN LATERAL (
                    SELECT lat, lng FROM driver_locations
                    WHERE driver_id = d.id
                    ORDER BY recorded_at DESC
                    LIMIT 1
                ) l ON true
                WHERE d.id = $1
                "#,
            )
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(Some((class, lat, lng))) => {
                if let Err(e) = self.geo.add_driver(class, driver_id, lng, lat).await {
                    tracing::warn!(%driver_id, error = %e, "Failed to re-index released driver");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(%driver_id, error = %e, "Failed to look up released driver position")
            }
        }
    }

    /// Write-through the ride cache after a mutation
    pub async fn write_through(&self, ride: &Ride) {
        let key = cache::ride_key(ride.id);
        if let Err(e) = self.cache.set_json(&key, ride, RIDE_CACHE_TTL).await {
            tracing::warn!(ride_id = %ride.id, error = %e, "Failed to write ride cache");
        }
    }

    /// Publish RIDE_STATUS_CHANGED plus the semantic duplicate on
    /// `ride-events`, keyed by tenant for per-tenant FIFO
    pub async fn publish_lifecycle(
        &self,
        ride: &Ride,
        old: Option<RideStatus>,
        semantic: RideEventType,
    ) {
        let data = json!({
            "ride_id": ride.id,
            "old": old.map(|s| s.as_str()),
            "new": ride.status.as_str(),
            "version": ride.version,
        });
        let key = ride.tenant_id.to_string();

        self.bus
            .publish_best_effort(
                TOPIC_RIDE_EVENTS,
                &key,
                &RideEventRecord::new(
                    ride.id,
                    ride.tenant_id,
                    RideEventType::RideStatusChanged,
                    data.clone(),
                ),
            )
            .await;

        if semantic != RideEventType::RideStatusChanged {
            self.bus
                .publish_best_effort(
                    TOPIC_RIDE_EVENTS,
                    &key,
                    &RideEventRecord::new(ride.id, ride.tenant_id, semantic, data),
                )
                .await;
        }
    }

    /// Build the simulator context for a ride
    pub fn sim_ride(ride: &Ride, driver_id: Uuid, vehicle_class: crate::models::VehicleClass) -> SimRide {
        SimRide {
            ride_id: ride.id,
            rider_id: ride.rider_id,
            driver_id,
            tenant_id: ride.tenant_id,
            vehicle_class,
            pickup: GeoPoint::new(ride.pickup_lat, ride.pickup_lng),
            dropoff: GeoPoint::new(ride.dropoff_lat, ride.dropoff_lng),
        }
    }
}
