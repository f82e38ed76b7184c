//! Typed event payloads for the platform topics
//!
//! Ride lifecycle events are keyed by tenant (per-tenant FIFO); notification
//! records are keyed by user so one user's stream stays ordered. The
//! realtime fabric consumes `NotificationRecord` and fans out to rooms with
//! an exhaustive match; adding an event means adding a variant here and a
//! mapping arm there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::VehicleClass;

/// Ride lifecycle event types published on `ride-events`
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideEventType {
    RideCreated,
    RideStatusChanged,
    DriverAssigned,
    TripStarted,
    TripCompleted,
    RideCancelled,
}

/// Record published on the `ride-events` topic
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideEventRecord {
    pub ride_id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: RideEventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl RideEventRecord {
    pub fn new(ride_id: Uuid, tenant_id: Uuid, event_type: RideEventType, data: Value) -> Self {
        Self {
            ride_id,
            tenant_id,
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Record published on the `location-updates` topic
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LocationRecord {
    pub driver_id: Uuid,
    pub tenant_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub vehicle_class: VehicleClass,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Notification event, tagged for exhaustive room mapping in the fabric
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    RideOffer {
        offer_id: Uuid,
        ride_id: Uuid,
        driver_id: Uuid,
        expires_at: DateTime<Utc>,
        pickup_lat: f64,
        pickup_lng: f64,
        estimated_fare: f64,
    },
    DriverAssigned {
        ride_id: Uuid,
        rider_id: Uuid,
        driver_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        driver_name: Option<String>,
        vehicle_class: VehicleClass,
    },
    RideDriverEnRoute {
        ride_id: Uuid,
    },
    RideDriverArrived {
        ride_id: Uuid,
    },
    DriverLocation {
        driver_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        rider_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ride_id: Option<Uuid>,
        lat: f64,
        lng: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        heading: Option<f64>,
        arrived: bool,
    },
    TripStarted {
        ride_id: Uuid,
        trip_id: Uuid,
    },
    TripCompleted {
        ride_id: Uuid,
        trip_id: Uuid,
        fare_total: f64,
        currency: String,
        driver_earnings: f64,
    },
    PaymentCompleted {
        rider_id: Uuid,
        payment_id: Uuid,
        amount: f64,
        currency: String,
    },
    PaymentReceived {
        driver_id: Uuid,
        payment_id: Uuid,
        amount: f64,
        currency: String,
    },
}

/// Record published on the `notifications` topic, keyed by `user_id`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationRecord {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub event: NotificationEvent,
    pub timestamp: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(user_id: Uuid, event: NotificationEvent) -> Self {
        Self {
            user_id,
            event,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_shape() {
        let record = NotificationRecord::new(
            Uuid::nil(),
            NotificationEvent::RideDriverArrived {
                ride_id: Uuid::nil(),
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "RIDE_DRIVER_ARRIVED");
        assert!(json["payload"]["ride_id"].is_string());
        assert!(json["user_id"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_ride_event_type_tags() {
        let tag = serde_json::to_value(RideEventType::RideStatusChanged).unwrap();
        assert_eq!(tag, "RIDE_STATUS_CHANGED");
    }

    #[test]
    fn test_notification_round_trip() {
        let record = NotificationRecord::new(
            Uuid::new_v4(),
            NotificationEvent::PaymentCompleted {
                rider_id: Uuid::new_v4(),
                payment_id: Uuid::new_v4(),
                amount: 147.0,
                currency: "INR".to_string(),
            },
        );
        let raw = serde_json::to_string(&record).unwrap();
        let back: NotificationRecord = serde_json::from_str(&raw).unwrap();
        match back.event {
            NotificationEvent::PaymentCompleted { amount, .. } => {
                assert!((amount - 147.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
