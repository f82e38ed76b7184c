//! Driver models and data structures

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::models::VehicleClass;

/// Driver availability status. `busy` is only ever set by the dispatch
/// engine; a busy driver has exactly one active ride.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "driver_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Offline,
    Online,
    Busy,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Offline => "offline",
            DriverStatus::Online => "online",
            DriverStatus::Busy => "busy",
        }
    }
}

/// Driver model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Driver {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone: String,
    pub name: Option<String>,
    pub vehicle_id: Option<String>,
    pub vehicle_class: VehicleClass,
    pub status: DriverStatus,
    pub rating: f64,
    pub total_rides: i32,
    pub acceptance_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cached driver metadata for the hot telemetry path (TTL-bounded)
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct DriverMeta {
    pub tenant_id: Uuid,
    pub status: DriverStatus,
    pub vehicle_class: VehicleClass,
}

impl From<&Driver> for DriverMeta {
    fn from(d: &Driver) -> Self {
        Self {
            tenant_id: d.tenant_id,
            status: d.status,
            vehicle_class: d.vehicle_class,
        }
    }
}

/// Request DTO for creating a driver
#[derive(Debug, Deserialize, Validate)]
pub struct CreateDriverRequest {
    pub tenant_id: Uuid,

    #[validate(length(min = 7, max = 20))]
    pub phone: String,

    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 50))]
    pub vehicle_id: Option<String>,

    pub vehicle_class: Option<VehicleClass>,
}

/// Request DTO for a driver status change
#[derive(Debug, Deserialize)]
pub struct UpdateDriverStatusRequest {
    pub status: DriverStatus,
}

/// Request DTO for a REST location report (WebSocket is preferred)
#[derive(Debug, Deserialize, Validate)]
pub struct DriverLocationRequest {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
}

/// Request DTO for accepting an offer
#[derive(Debug, Deserialize)]
pub struct AcceptOfferRequest {
    pub ride_id: Uuid,
}

/// Request DTO for declining an offer
#[derive(Debug, Deserialize)]
pub struct DeclineOfferRequest {
    pub ride_id: Uuid,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_request_validation() {
        let ok = DriverLocationRequest {
            latitude: 12.97,
            longitude: 77.59,
            heading: Some(45.0),
            speed: None,
            accuracy: None,
        };
        assert!(ok.validate().is_ok());

        let bad = DriverLocationRequest {
            latitude: 123.0,
            longitude: 77.59,
            heading: None,
            speed: None,
            accuracy: None,
        };
        assert!(bad.validate().is_err());
    }
}
