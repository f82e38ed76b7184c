//! Ride models and the lifecycle transition table

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::models::{PaymentMethod, VehicleClass};

/// Ride lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "ride_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested,
    Matching,
    DriverAssigned,
    DriverEnRoute,
    DriverArrived,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Whether the ride has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Whether the ride counts toward a driver's active set
    pub fn is_active_assignment(&self) -> bool {
        matches!(
            self,
            RideStatus::DriverAssigned
                | RideStatus::DriverEnRoute
                | RideStatus::DriverArrived
                | RideStatus::InProgress
        )
    }

    /// Whether cancellation is permitted from this state. A ride in progress
    /// must complete.
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal() && *self != RideStatus::InProgress
    }

    /// The lifecycle transition table. Cancellation is additionally gated by
    /// [`RideStatus::is_cancellable`]; this covers the forward edges and the
    /// matching → requested revert.
    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, next),
            (Requested, Matching)
                | (Matching, Matching)
                | (Matching, DriverAssigned)
                | (Matching, Requested)
                | (DriverAssigned, DriverEnRoute)
                | (DriverEnRoute, DriverArrived)
                | (DriverArrived, InProgress)
                | (InProgress, Completed)
        ) || (next == Cancelled && self.is_cancellable())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "REQUESTED",
            RideStatus::Matching => "MATCHING",
            RideStatus::DriverAssigned => "DRIVER_ASSIGNED",
            RideStatus::DriverEnRoute => "DRIVER_EN_ROUTE",
            RideStatus::DriverArrived => "DRIVER_ARRIVED",
            RideStatus::InProgress => "IN_PROGRESS",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Ride model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Ride {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: RideStatus,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: Option<String>,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub dropoff_address: Option<String>,
    pub tier: VehicleClass,
    pub payment_method: PaymentMethod,
    pub surge_multiplier: f64,
    pub estimated_fare: f64,
    pub estimated_distance_km: f64,
    pub estimated_duration_mins: i32,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

/// Request DTO for creating a ride
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRideRequest {
    pub tenant_id: Uuid,
    pub rider_id: Uuid,

    #[validate(range(min = -90.0, max = 90.0))]
    pub pickup_lat: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub pickup_lng: f64,

    #[validate(length(max = 300))]
    pub pickup_address: Option<String>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub dropoff_lat: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub dropoff_lng: f64,

    #[validate(length(max = 300))]
    pub dropoff_address: Option<String>,

    pub tier: Option<VehicleClass>,
    pub payment_method: Option<PaymentMethod>,
}

/// Request DTO for cancelling a ride
#[derive(Debug, Deserialize, Default)]
pub struct CancelRideRequest {
    pub reason: Option<String>,
}

/// Request DTO for an explicit status transition
#[derive(Debug, Deserialize)]
pub struct UpdateRideStatusRequest {
    pub status: RideStatus,
}

/// Query parameters for an optimistic-version transition
#[derive(Debug, Deserialize, Default)]
pub struct VersionQuery {
    pub version: Option<i32>,
}

/// Query parameters for listing rides
#[derive(Debug, Deserialize, Default)]
pub struct ListRidesQuery {
    pub status: Option<RideStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use RideStatus::*;

    #[test]
    fn test_forward_edges() {
        assert!(Requested.can_transition_to(Matching));
        assert!(Matching.can_transition_to(DriverAssigned));
        assert!(Matching.can_transition_to(Requested));
        assert!(DriverAssigned.can_transition_to(DriverEnRoute));
        assert!(DriverEnRoute.can_transition_to(DriverArrived));
        assert!(DriverArrived.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
    }

    #[test]
    fn test_no_skipping_states() {
        assert!(!Requested.can_transition_to(DriverAssigned));
        assert!(!Matching.can_transition_to(DriverEnRoute));
        assert!(!DriverAssigned.can_transition_to(DriverArrived));
        assert!(!DriverEnRoute.can_transition_to(InProgress));
        assert!(!DriverArrived.can_transition_to(Completed));
    }

    #[test]
    fn test_in_progress_must_complete() {
        assert!(!InProgress.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Completed));
    }

    #[test]
    fn test_cancellable_states() {
        for s in [Requested, Matching, DriverAssigned, DriverEnRoute, DriverArrived] {
            assert!(s.can_transition_to(Cancelled), "{s:?} should cancel");
        }
        for s in [InProgress, Completed, Cancelled] {
            assert!(!s.can_transition_to(Cancelled), "{s:?} should not cancel");
        }
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for next in [
            Requested,
            Matching,
            DriverAssigned,
            DriverEnRoute,
            DriverArrived,
            InProgress,
            Completed,
            Cancelled,
        ] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn test_active_assignment_set() {
        assert!(DriverAssigned.is_active_assignment());
        assert!(InProgress.is_active_assignment());
        assert!(!Requested.is_active_assignment());
        assert!(!Completed.is_active_assignment());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(DriverEnRoute).unwrap();
        assert_eq!(json, "DRIVER_EN_ROUTE");
        let back: RideStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, DriverEnRoute);
    }
}
