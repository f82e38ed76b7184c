//! Geo index adapter
//!
//! Driver positions are indexed in Redis, one geo set per vehicle class so
//! nearby queries are tier-pure. All mutations are idempotent upserts; races
//! between add and remove resolve to the last writer, which is acceptable
//! because the canonical driver status lives in the database.

pub mod spherical;

pub use spherical::{destination_point, haversine_km, initial_bearing_deg};

use redis::aio::ConnectionManager;
use redis::geo::{Coord, RadiusOptions, RadiusOrder, RadiusSearchResult, Unit};
use redis::{AsyncCommands, Client};
use uuid::Uuid;

use crate::models::VehicleClass;

/// Geo index error
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("Failed to connect to Redis: {0}")]
    Connection(String),

    #[error("Geo command failed: {0}")]
    Command(#[from] redis::RedisError),
}

/// Redis-backed driver position index, partitioned by vehicle class.
#[derive(Clone)]
pub struct GeoIndex {
    conn: ConnectionManager,
}

impl GeoIndex {
    /// Connect to Redis and return a geo index handle
    pub async fn connect(redis_url: &str) -> Result<Self, GeoError> {
        let client = Client::open(redis_url).map_err(|e| GeoError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| GeoError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    fn class_key(class: VehicleClass) -> String {
        format!("geo:drivers:{}", class.as_str())
    }

    /// Idempotent upsert of a driver position
    pub async fn add_driver(
        &self,
        class: VehicleClass,
        driver_id: Uuid,
        lng: f64,
        lat: f64,
    ) -> Result<(), GeoError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .geo_add(
                Self::class_key(class),
                (Coord::lon_lat(lng, lat), driver_id.to_string()),
            )
            .await?;
        Ok(())
    }

    /// Idempotent removal of a driver position
    pub async fn remove_driver(&self, class: VehicleClass, driver_id: Uuid) -> Result<(), GeoError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zrem(Self::class_key(class), driver_id.to_string())
            .await?;
        Ok(())
    }

    /// Drivers of `class` within `radius_km` of the given point, sorted
    /// ascending by distance, at most `max_count` results.
    pub async fn nearby(
        &self,
        class: VehicleClass,
        lng: f64,
        lat: f64,
        radius_km: f64,
        max_count: usize,
    ) -> Result<Vec<(Uuid, f64)>, GeoError> {
        let mut conn = self.conn.clone();
        let opts = RadiusOptions::default()
            .with_dist()
            .order(RadiusOrder::Asc)
            .limit(max_count);

        let results: Vec<RadiusSearchResult> = conn
            .geo_radius(Self::class_key(class), lng, lat, radius_km, Unit::Kilometers, opts)
            .await?;

        let mut drivers = Vec::with_capacity(results.len());
        for r in results {
            let Ok(id) = Uuid::parse_str(&r.name) else {
                tracing::warn!(member = %r.name, "Skipping non-UUID member in geo index");
                continue;
            };
            drivers.push((id, r.dist.unwrap_or(0.0)));
        }
        Ok(drivers)
    }
}
