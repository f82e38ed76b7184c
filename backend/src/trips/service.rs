//! Trip service layer: trip start/end, fare settlement, driver release

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::bus::{EventBus, NotificationEvent, NotificationRecord, RideEventType, TOPIC_NOTIFICATIONS};
use crate::cache::{self, Cache};
use crate::db::with_tx_retry;
use crate::error::{ApiError, ApiResult};
use crate::geo::GeoIndex;
use crate::models::VehicleClass;
use crate::rides::{Ride, RideService, RideStatus};
use crate::simulator::{SimPhase, SimulatorRegistry};
use crate::trips::fare::{self, DRIVER_SHARE};
use crate::trips::model::{EndTripRequest, Trip, TripStatus};

/// Fallback distance when neither actuals nor an estimate exist, km
const FALLBACK_DISTANCE_KM: f64 = 5.0;

/// Trip service
pub struct TripService {
    pool: PgPool,
    cache: Cache,
    bus: EventBus,
    geo: GeoIndex,
    sims: Arc<SimulatorRegistry>,
    rides: Arc<RideService>,
}

impl TripService {
    pub fn new(
        pool: PgPool,
        cache: Cache,
        bus: EventBus,
        geo: GeoIndex,
        sims: Arc<SimulatorRegistry>,
        rides: Arc<RideService>,
    ) -> Self {
        Self {
            pool,
            cache,
            bus,
            geo,
            sims,
            rides,
        }
    }

    /// Get a trip by id
    pub async fn get(&self, id: Uuid) -> ApiResult<Trip> {
        sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Trip {} not found", id)))
    }

    /// Start the trip for a ride at DRIVER_ARRIVED: creates the trip row and
    /// moves the ride to IN_PROGRESS in one transaction.
    pub async fn start_trip(&self, ride_id: Uuid) -> ApiResult<Trip> {
        let (trip, ride) = with_tx_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let current =
                sqlx::query_as::<_, Ride>("SELECT * FROM rides WHERE id = $1 FOR UPDATE NOWAIT")
                    .bind(ride_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("Ride {} not found", ride_id)))?;

            if current.status != RideStatus::DriverArrived {
                return Err(ApiError::InvalidStateTransition(format!(
                    "Trip can only start once the driver has arrived (status {})",
                    current.status.as_str()
                )));
            }

            let trip = sqlx::query_as::<_, Trip>(
                r#"
                INSERT INTO trips (ride_id, status, started_at)
                VALUES ($1, 'in_progress', now())
                RETURNING *
                "#,
            )
            .bind(ride_id)
            .fetch_one(&mut *tx)
            .await?;

            let ride = sqlx::query_as::<_, Ride>(
                r#"
                UPDATE rides
                SET status = 'in_progress', version = version + 1
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(ride_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok((trip, ride))
        })
        .await?;

        self.rides.write_through(&ride).await;
        self.rides
            .publish_lifecycle(&ride, Some(RideStatus::DriverArrived), RideEventType::TripStarted)
            .await;

        let notification = NotificationRecord::new(
            ride.rider_id,
            NotificationEvent::TripStarted {
                ride_id,
                trip_id: trip.id,
            },
        );
        self.bus
            .publish_best_effort(TOPIC_NOTIFICATIONS, &ride.rider_id.to_string(), &notification)
            .await;

        // Same driver, same ride, new target.
        if let Some(driver_id) = ride.driver_id {
            match self.driver_class(driver_id).await {
                Ok(class) => {
                    self.sims
                        .start(
                            RideService::sim_ride(&ride, driver_id, class),
                            SimPhase::ToDropoff,
                        )
                        .await;
                }
                Err(e) => {
                    tracing::warn!(%driver_id, error = %e, "Failed to switch simulator phase")
                }
            }
        }

        tracing::info!(ride_id = %ride_id, trip_id = %trip.id, "Trip started");
        Ok(trip)
    }

    /// End an in-progress trip: settle the fare, complete the ride, release
    /// the driver back to online, and re-index them at their last position.
    pub async fn end_trip(&self, trip_id: Uuid, request: EndTripRequest) -> ApiResult<Trip> {
        let (trip, ride, driver_id, vehicle_class) = with_tx_retry(|| {
            let request = EndTripRequest {
                actual_distance_km: request.actual_distance_km,
                actual_duration_mins: request.actual_duration_mins,
                route_polyline: request.route_polyline.clone(),
            };
            async move {
                let mut tx = self.pool.begin().await?;

                let current =
                    sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1 FOR UPDATE")
                        .bind(trip_id)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or_else(|| ApiError::NotFound(format!("Trip {} not found", trip_id)))?;

                if current.status != TripStatus::InProgress {
                    return Err(ApiError::InvalidStateTransition(format!(
                        "Trip is not in progress (status {:?})",
                        current.status
                    )));
                }

                let ride = sqlx::query_as::<_, Ride>(
                    "SELECT * FROM rides WHERE id = $1 FOR UPDATE NOWAIT",
                )
                .bind(current.ride_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    ApiError::Internal(format!("Ride {} missing for trip", current.ride_id))
                })?;

                let driver_id = ride.driver_id.ok_or_else(|| {
                    ApiError::Internal("In-progress ride has no driver".to_string())
                })?;

                let distance_km = request
                    .actual_distance_km
                    .or((ride.estimated_distance_km > 0.0).then_some(ride.estimated_distance_km))
                    .unwrap_or(FALLBACK_DISTANCE_KM);

                let duration_mins = request.actual_duration_mins.unwrap_or_else(|| {
                    let elapsed = chrono::Utc::now() - current.started_at;
                    (elapsed.num_seconds().max(0) as f64 / 60.0).ceil() as i32
                });

                let breakdown = fare::compute_fare(
                    ride.tier,
                    distance_km,
                    f64::from(duration_mins),
                    ride.surge_multiplier,
                );

                let trip = sqlx::query_as::<_, Trip>(
                    r#"
                    UPDATE trips
                    SET status = 'completed',
                        ended_at = now(),
                        actual_distance_km = $2,
                        actual_duration_mins = $3,
                        route_polyline = $4,
                        fare_base = $5,
                        fare_distance = $6,
                        fare_time = $7,
                        fare_surge = $8,
                        fare_taxes = $9,
                        fare_total = $10
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(trip_id)
                .bind(distance_km)
                .bind(duration_mins)
                .bind(&request.route_polyline)
                .bind(breakdown.base)
                .bind(breakdown.distance)
                .bind(breakdown.time)
                .bind(breakdown.surge)
                .bind(breakdown.taxes)
                .bind(breakdown.total)
                .fetch_one(&mut *tx)
                .await?;

                let ride = sqlx::query_as::<_, Ride>(
                    r#"
                    UPDATE rides
                    SET status = 'completed', version = version + 1
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(ride.id)
                .fetch_one(&mut *tx)
                .await?;

                let vehicle_class: VehicleClass = sqlx::query_scalar(
                    r#"
                    UPDATE drivers
                    SET status = 'online', total_rides = total_rides + 1
                    WHERE id = $1
                    RETURNING vehicle_class
                    "#,
                )
                .bind(driver_id)
                .fetch_one(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok((trip, ride, driver_id, vehicle_class))
            }
        })
        .await?;

        self.sims.stop(driver_id).await;
        self.reindex_driver(driver_id, vehicle_class).await;

        let stale = vec![
            cache::driver_key(driver_id),
            cache::driver_meta_key(driver_id),
            cache::rider_key(ride.rider_id),
        ];
        if let Err(e) = self.cache.del(&stale).await {
            tracing::warn!(trip_id = %trip_id, error = %e, "Failed to invalidate caches after trip end");
        }
        self.rides.write_through(&ride).await;

        self.rides
            .publish_lifecycle(&ride, Some(RideStatus::InProgress), RideEventType::TripCompleted)
            .await;

        let total = trip.fare_total.unwrap_or(0.0);
        let notification = NotificationRecord::new(
            ride.rider_id,
            NotificationEvent::TripCompleted {
                ride_id: ride.id,
                trip_id: trip.id,
                fare_total: total,
                currency: trip.currency.clone(),
                driver_earnings: fare::round2(total * DRIVER_SHARE),
            },
        );
        self.bus
            .publish_best_effort(TOPIC_NOTIFICATIONS, &ride.rider_id.to_string(), &notification)
            .await;

        tracing::info!(
            trip_id = %trip_id,
            ride_id = %ride.id,
            fare_total = total,
            "Trip completed"
        );
        Ok(trip)
    }

    async fn driver_class(&self, driver_id: Uuid) -> ApiResult<VehicleClass> {
        let class: Option<VehicleClass> =
            sqlx::query_scalar("SELECT vehicle_class FROM drivers WHERE id = $1")
                .bind(driver_id)
                .fetch_optional(&self.pool)
                .await?;
        class.ok_or_else(|| ApiError::NotFound(format!("Driver {} not found", driver_id)))
    }

    /// Put the released driver back in the geo index if a recent location
    /// exists
    async fn reindex_driver(&self, driver_id: Uuid, vehicle_class: VehicleClass) {
        let row: Result<Option<(f64, f64)>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT lat, lng FROM driver_locations
            WHERE driver_id = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some((lat, lng))) => {
                if let Err(e) = self.geo.add_driver(vehicle_class, driver_id, lng, lat).await {
                    tracing::warn!(%driver_id, error = %e, "Failed to re-index released driver");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(%driver_id, error = %e, "Failed to read driver location"),
        }
    }
}
