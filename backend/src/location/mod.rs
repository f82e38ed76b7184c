//! Location ingest
//!
//! Telemetry samples update the live geo index immediately (online drivers
//! only), are republished on the bus, and are buffered for bulk insertion
//! into history every second or every 100 samples, whichever comes first.
//! Unflushed samples are lost on crash; the geo index carries the
//! authoritative live state.

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bus::{EventBus, LocationRecord, TOPIC_LOCATION_UPDATES};
use crate::drivers::{DriverMeta, DriverService, DriverStatus};
use crate::error::ApiResult;
use crate::geo::GeoIndex;

/// Flush when the buffer reaches this many samples
const FLUSH_THRESHOLD: usize = 100;

/// A buffered telemetry sample awaiting persistence
#[derive(Debug, Clone)]
struct BufferedSample {
    driver_id: Uuid,
    lat: f64,
    lng: f64,
    heading: Option<f64>,
    speed: Option<f64>,
    accuracy: Option<f64>,
}

/// Location ingest service
pub struct LocationService {
    pool: PgPool,
    bus: EventBus,
    geo: GeoIndex,
    drivers: Arc<DriverService>,
    buffer: Mutex<Vec<BufferedSample>>,
}

impl LocationService {
    pub fn new(pool: PgPool, bus: EventBus, geo: GeoIndex, drivers: Arc<DriverService>) -> Self {
        Self {
            pool,
            bus,
            geo,
            drivers,
            buffer: Mutex::new(Vec::with_capacity(FLUSH_THRESHOLD)),
        }
    }

    /// Ingest one telemetry sample. Matching sees the new position as soon
    /// as this returns; history may lag by up to one flush interval.
    pub async fn record(
        &self,
        driver_id: Uuid,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
        accuracy: Option<f64>,
    ) -> ApiResult<DriverMeta> {
        let meta = self.drivers.meta(driver_id).await?;

        if meta.status == DriverStatus::Online {
            if let Err(e) = self
                .geo
                .add_driver(meta.vehicle_class, driver_id, lng, lat)
                .await
            {
                tracing::warn!(%driver_id, error = %e, "Failed to update geo index");
            }
        }

        let flush_now = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(BufferedSample {
                driver_id,
                lat,
                lng,
                heading,
                speed,
                accuracy,
            });
            buffer.len() >= FLUSH_THRESHOLD
        };
        if flush_now {
            self.flush().await;
        }

        let record = LocationRecord {
            driver_id,
            tenant_id: meta.tenant_id,
            lat,
            lng,
            heading,
            speed,
            vehicle_class: meta.vehicle_class,
            status: meta.status.as_str().to_string(),
            timestamp: chrono::Utc::now(),
        };
        self.bus
            .publish_best_effort(TOPIC_LOCATION_UPDATES, &meta.tenant_id.to_string(), &record)
            .await;

        Ok(meta)
    }

    /// Flush all buffered samples as one bulk insert
    pub async fn flush(&self) {
        let batch: Vec<BufferedSample> = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        let mut driver_ids = Vec::with_capacity(count);
        let mut lats = Vec::with_capacity(count);
        let mut lngs = Vec::with_capacity(count);
        let mut headings: Vec<Option<f64>> = Vec::with_capacity(count);
        let mut speeds: Vec<Option<f64>> = Vec::with_capacity(count);
        let mut accuracies: Vec<Option<f64>> = Vec::with_capacity(count);

        for s in batch {
            driver_ids.push(s.driver_id);
            lats.push(s.lat);
            lngs.push(s.lng);
            headings.push(s.heading);
            speeds.push(s.speed);
            accuracies.push(s.accuracy);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO driver_locations (driver_id, lat, lng, heading, speed, accuracy)
            SELECT * FROM UNNEST(
                $1::uuid[], $2::float8[], $3::float8[],
                $4::float8[], $5::float8[], $6::float8[]
            )
            "#,
        )
        .bind(&driver_ids)
        .bind(&lats)
        .bind(&lngs)
        .bind(&headings)
        .bind(&speeds)
        .bind(&accuracies)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => tracing::debug!(count, "Flushed location samples"),
            Err(e) => tracing::error!(count, error = %e, "Location batch insert failed"),
        }
    }

    /// Background flush loop; spawn at startup. Call [`flush`](Self::flush)
    /// once more after shutdown to drain the tail synchronously.
    pub async fn run_flusher(self: Arc<Self>, interval: Duration) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Location flusher started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.flush().await;
        }
    }
}
