//! Trip models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Trip status. A trip row exists iff the ride ever reached IN_PROGRESS.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "trip_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Started,
    InProgress,
    Completed,
    Disputed,
}

/// Trip row with flat fare columns
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Trip {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub status: TripStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub actual_distance_km: Option<f64>,
    pub actual_duration_mins: Option<i32>,
    pub route_polyline: Option<String>,
    pub fare_base: Option<f64>,
    pub fare_distance: Option<f64>,
    pub fare_time: Option<f64>,
    pub fare_surge: Option<f64>,
    pub fare_taxes: Option<f64>,
    pub fare_total: Option<f64>,
    pub currency: String,
}

impl Trip {
    /// Structured fare breakdown, present once the trip has ended
    pub fn fare_breakdown(&self) -> Option<FareBreakdown> {
        Some(FareBreakdown {
            base: self.fare_base?,
            distance: self.fare_distance?,
            time: self.fare_time?,
            surge: self.fare_surge?,
            taxes: self.fare_taxes?,
            total: self.fare_total?,
            currency: self.currency.clone(),
        })
    }
}

/// Itemised fare
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FareBreakdown {
    pub base: f64,
    pub distance: f64,
    pub time: f64,
    pub surge: f64,
    pub taxes: f64,
    pub total: f64,
    pub currency: String,
}

/// Trip API shape: row fields plus the nested breakdown
#[derive(Debug, Serialize)]
pub struct TripResponse {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub status: TripStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_duration_mins: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_polyline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fare_breakdown: Option<FareBreakdown>,
}

impl From<Trip> for TripResponse {
    fn from(t: Trip) -> Self {
        let fare_breakdown = t.fare_breakdown();
        Self {
            id: t.id,
            ride_id: t.ride_id,
            status: t.status,
            started_at: t.started_at,
            ended_at: t.ended_at,
            actual_distance_km: t.actual_distance_km,
            actual_duration_mins: t.actual_duration_mins,
            route_polyline: t.route_polyline,
            fare_breakdown,
        }
    }
}

/// Request DTO for starting a trip
#[derive(Debug, Deserialize)]
pub struct StartTripRequest {
    pub ride_id: Uuid,
}

/// Request DTO for ending a trip
#[derive(Debug, Deserialize, Validate, Default)]
pub struct EndTripRequest {
    #[validate(range(min = 0.0, max = 2000.0))]
    pub actual_distance_km: Option<f64>,

    #[validate(range(min = 0, max = 100_000))]
    pub actual_duration_mins: Option<i32>,

    #[validate(length(max = 100_000))]
    pub route_polyline: Option<String>,
}
