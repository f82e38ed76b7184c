//! Driver motion simulator
//!
//! One cooperative task per active ride, keyed by driver. Each tick moves
//! the driver along the great-circle bearing toward the phase target at the
//! configured speed, updates the geo index, publishes telemetry, and
//! appends a location sample fire-and-forget. Replacing a driver's task
//! (phase switch) cancels the previous one before starting the next.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::{
    EventBus, LocationRecord, NotificationEvent, NotificationRecord, TOPIC_LOCATION_UPDATES,
    TOPIC_NOTIFICATIONS,
};
use crate::geo::{destination_point, haversine_km, initial_bearing_deg, GeoIndex};
use crate::models::{GeoPoint, VehicleClass};

/// Arrival threshold: within 50 m of the target the leg is done
const ARRIVAL_THRESHOLD_KM: f64 = 0.05;

/// Simulator phase: toward pickup before the trip starts, toward dropoff
/// after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPhase {
    ToPickup,
    ToDropoff,
}

/// Ride context a simulated driver moves within
#[derive(Debug, Clone)]
pub struct SimRide {
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Uuid,
    pub tenant_id: Uuid,
    pub vehicle_class: VehicleClass,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

struct SimTask {
    ride_id: Uuid,
    phase: SimPhase,
    handle: JoinHandle<()>,
}

/// Supervisor for per-driver motion tasks
pub struct SimulatorRegistry {
    pool: PgPool,
    geo: GeoIndex,
    bus: EventBus,
    tick: Duration,
    speed_kmh: f64,
    tasks: RwLock<HashMap<Uuid, SimTask>>,
}

impl SimulatorRegistry {
    pub fn new(
        pool: PgPool,
        geo: GeoIndex,
        bus: EventBus,
        tick_seconds: u64,
        speed_kmh: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            geo,
            bus,
            tick: Duration::from_secs(tick_seconds.max(1)),
            speed_kmh,
            tasks: RwLock::new(HashMap::new()),
        })
    }

    /// Start (or replace) the motion task for the ride's driver
    pub async fn start(self: &Arc<Self>, ride: SimRide, phase: SimPhase) {
        let start = match self.latest_position(ride.driver_id).await {
            Some(p) => p,
            None => ride.pickup,
        };

        let mut tasks = self.tasks.write().await;
        if let Some(previous) = tasks.remove(&ride.driver_id) {
            previous.handle.abort();
        }

        let registry = Arc::clone(self);
        let driver_id = ride.driver_id;
        let ride_id = ride.ride_id;
        let handle = tokio::spawn(async move {
            registry.clone().drive(ride, phase, start).await;
        });

        tasks.insert(
            driver_id,
            SimTask {
                ride_id,
                phase,
                handle,
            },
        );

        tracing::debug!(driver_id = %driver_id, ride_id = %ride_id, ?phase, "Simulator task started");
    }

    /// Stop the driver's motion task, if one is running
    pub async fn stop(&self, driver_id: Uuid) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.remove(&driver_id) {
            task.handle.abort();
            tracing::debug!(driver_id = %driver_id, ride_id = %task.ride_id, "Simulator task stopped");
        }
    }

    /// Stop every task (shutdown)
    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.write().await;
        let count = tasks.len();
        for (_, task) in tasks.drain() {
            task.handle.abort();
        }
        if count > 0 {
            tracing::info!(count, "All simulator tasks stopped");
        }
    }

    /// Number of live tasks (used by the health surface)
    pub async fn active_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    async fn latest_position(&self, driver_id: Uuid) -> Option<GeoPoint> {
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
        .await
        .ok()
        .flatten();

        row.map(|(lat, lng)| GeoPoint::new(lat, lng))
    }

    async fn drive(self: Arc<Self>, ride: SimRide, phase: SimPhase, start: GeoPoint) {
        let target = match phase {
            SimPhase::ToPickup => ride.pickup,
            SimPhase::ToDropoff => ride.dropoff,
        };
        let step_km = self.speed_kmh * self.tick.as_secs_f64() / 3600.0;

        let mut pos = start;
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let remaining = haversine_km(pos.lat, pos.lng, target.lat, target.lng);
            let heading = initial_bearing_deg(pos.lat, pos.lng, target.lat, target.lng);

            if remaining <= step_km {
                pos = target;
            } else {
                let jitter = { rand::thread_rng().gen_range(-8.0..8.0) };
                let (lat, lng) = destination_point(pos.lat, pos.lng, heading + jitter, step_km);
                pos = GeoPoint::new(lat, lng);
            }

            let arrived =
                haversine_km(pos.lat, pos.lng, target.lat, target.lng) <= ARRIVAL_THRESHOLD_KM;

            self.emit_tick(&ride, pos, heading, arrived).await;

            if arrived {
                tracing::debug!(
                    driver_id = %ride.driver_id,
                    ride_id = %ride.ride_id,
                    ?phase,
                    "Simulated driver reached target"
                );
                let mut tasks = self.tasks.write().await;
                let owned_by_us = tasks
                    .get(&ride.driver_id)
                    .map(|t| t.ride_id == ride.ride_id && t.phase == phase)
                    .unwrap_or(false);
                if owned_by_us {
                    tasks.remove(&ride.driver_id);
                }
                return;
            }
        }
    }

    async fn emit_tick(&self, ride: &SimRide, pos: GeoPoint, heading: f64, arrived: bool) {
        if let Err(e) = self
            .geo
            .add_driver(ride.vehicle_class, ride.driver_id, pos.lng, pos.lat)
            .await
        {
            tracing::warn!(driver_id = %ride.driver_id, error = %e, "Simulator geo update failed");
        }

        let record = LocationRecord {
            driver_id: ride.driver_id,
            tenant_id: ride.tenant_id,
            lat: pos.lat,
            lng: pos.lng,
            heading: Some(heading),
            speed: Some(self.speed_kmh),
            vehicle_class: ride.vehicle_class,
            status: "busy".to_string(),
            timestamp: chrono::Utc::now(),
        };
        self.bus
            .publish_best_effort(
                TOPIC_LOCATION_UPDATES,
                &ride.tenant_id.to_string(),
                &record,
            )
            .await;

        let notification = NotificationRecord::new(
            ride.rider_id,
            NotificationEvent::DriverLocation {
                driver_id: ride.driver_id,
                rider_id: Some(ride.rider_id),
                ride_id: Some(ride.ride_id),
                lat: pos.lat,
                lng: pos.lng,
                heading: Some(heading),
                arrived,
            },
        );
        self.bus
            .publish_best_effort(
                TOPIC_NOTIFICATIONS,
                &ride.rider_id.to_string(),
                &notification,
            )
            .await;

        // History is best-effort: the geo index carries the live truth.
        let pool = self.pool.clone();
        let driver_id = ride.driver_id;
        let speed = self.speed_kmh;
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO driver_locations (driver_id, lat, lng, heading, speed)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(driver_id)
            .bind(pos.lat)
            .bind(pos.lng)
            .bind(heading)
            .bind(speed)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::warn!(driver_id = %driver_id, error = %e, "Failed to append simulated sample");
            }
        });
    }
}
