//! Notifications-topic consumer
//!
//! Bridges the durable bus into the socket layer: each record's event type
//! maps to exactly one socket event and target room set. The mapping is
//! authoritative and exhaustively matched, so a new notification variant
//! fails to compile until it is routed. At-least-once delivery is safe
//! because room emission is stateless.

use rdkafka::consumer::StreamConsumer;
use rdkafka::message::Message;
use serde_json::Value;
use std::time::Duration;

use crate::bus::{BusError, EventBus, NotificationEvent, NotificationRecord, TOPIC_NOTIFICATIONS};
use crate::realtime::{Room, WsState};

/// Socket event name and target rooms for a notification
fn route(event: &NotificationEvent) -> (&'static str, Vec<Room>) {
    match event {
        NotificationEvent::RideOffer { driver_id, .. } => {
            ("ride:offer", vec![Room::User(*driver_id)])
        }
        NotificationEvent::DriverAssigned {
            rider_id, ride_id, ..
        } => (
            "ride:driver_assigned",
            vec![Room::User(*rider_id), Room::Ride(*ride_id)],
        ),
        NotificationEvent::RideDriverEnRoute { ride_id } => {
            ("ride:driver_en_route", vec![Room::Ride(*ride_id)])
        }
        NotificationEvent::RideDriverArrived { ride_id } => {
            ("ride:driver_arrived", vec![Room::Ride(*ride_id)])
        }
        NotificationEvent::DriverLocation {
            rider_id, ride_id, ..
        } => {
            let mut rooms = Vec::with_capacity(2);
            if let Some(rider_id) = rider_id {
                rooms.push(Room::User(*rider_id));
            }
            if let Some(ride_id) = ride_id {
                rooms.push(Room::Ride(*ride_id));
            }
            ("driver:location:update", rooms)
        }
        NotificationEvent::TripStarted { ride_id, .. } => {
            ("trip:started", vec![Room::Ride(*ride_id)])
        }
        NotificationEvent::TripCompleted { ride_id, .. } => {
            ("trip:completed", vec![Room::Ride(*ride_id)])
        }
        NotificationEvent::PaymentCompleted { rider_id, .. } => {
            ("payment:completed", vec![Room::User(*rider_id)])
        }
        NotificationEvent::PaymentReceived { driver_id, .. } => {
            ("payment:received", vec![Room::User(*driver_id)])
        }
    }
}

/// Consume the notifications topic and fan records out to rooms. Spawn at
/// startup; reconnects with backoff on consumer errors.
pub async fn run_notifications_consumer(
    bus: EventBus,
    group_id: String,
    ws: WsState,
) -> Result<(), BusError> {
    let consumer: StreamConsumer = bus.consumer(&group_id, &[TOPIC_NOTIFICATIONS])?;
    tracing::info!(group_id, topic = TOPIC_NOTIFICATIONS, "Notifications consumer started");

    loop {
        match consumer.recv().await {
            Ok(message) => {
                let Some(payload) = message.payload() else {
                    continue;
                };
                let record: NotificationRecord = match serde_json::from_slice(payload) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping undecodable notification");
                        continue;
                    }
                };

                let (event, rooms) = route(&record.event);
                if rooms.is_empty() {
                    continue;
                }

                let data = serde_json::to_value(&record.event)
                    .ok()
                    .and_then(|v| v.get("payload").cloned())
                    .unwrap_or(Value::Null);

                ws.emit(rooms, event, data);
            }
            Err(e) => {
                tracing::error!(error = %e, "Notifications consumer error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_offer_targets_driver_room() {
        let driver_id = Uuid::new_v4();
        let event = NotificationEvent::RideOffer {
            offer_id: Uuid::new_v4(),
            ride_id: Uuid::new_v4(),
            driver_id,
            expires_at: chrono::Utc::now(),
            pickup_lat: 0.0,
            pickup_lng: 0.0,
            estimated_fare: 0.0,
        };
        let (name, rooms) = route(&event);
        assert_eq!(name, "ride:offer");
        assert_eq!(rooms, vec![Room::User(driver_id)]);
    }

    #[test]
    fn test_assignment_targets_rider_and_ride() {
        let rider_id = Uuid::new_v4();
        let ride_id = Uuid::new_v4();
        let event = NotificationEvent::DriverAssigned {
            ride_id,
            rider_id,
            driver_id: Uuid::new_v4(),
            driver_name: None,
            vehicle_class: crate::models::VehicleClass::Economy,
        };
        let (name, rooms) = route(&event);
        assert_eq!(name, "ride:driver_assigned");
        assert_eq!(rooms, vec![Room::User(rider_id), Room::Ride(ride_id)]);
    }

    #[test]
    fn test_payment_events_target_single_user() {
        let rider_id = Uuid::new_v4();
        let (name, rooms) = route(&NotificationEvent::PaymentCompleted {
            rider_id,
            payment_id: Uuid::new_v4(),
            amount: 10.0,
            currency: "INR".to_string(),
        });
        assert_eq!(name, "payment:completed");
        assert_eq!(rooms, vec![Room::User(rider_id)]);

        let driver_id = Uuid::new_v4();
        let (name, rooms) = route(&NotificationEvent::PaymentReceived {
            driver_id,
            payment_id: Uuid::new_v4(),
            amount: 8.0,
            currency: "INR".to_string(),
        });
        assert_eq!(name, "payment:received");
        assert_eq!(rooms, vec![Room::User(driver_id)]);
    }
}
