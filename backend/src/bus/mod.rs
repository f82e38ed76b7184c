//! Event bus adapter (Kafka-compatible)
//!
//! Keyed publishes to the three platform topics, plus consumer-group
//! creation for the realtime fabric. Delivery is at-least-once with per-key
//! FIFO ordering; consumers must handle duplicates idempotently. Publish
//! failures on side-effect paths are logged and swallowed by callers; the
//! authoritative database state is already committed.

pub mod events;

pub use events::*;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::time::Duration;

/// Topic carrying raw driver telemetry, keyed by tenant
pub const TOPIC_LOCATION_UPDATES: &str = "location-updates";
/// Topic carrying ride lifecycle events, keyed by tenant
pub const TOPIC_RIDE_EVENTS: &str = "ride-events";
/// Topic feeding the realtime fabric, keyed by user
pub const TOPIC_NOTIFICATIONS: &str = "notifications";

/// Event bus error
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to create Kafka client: {0}")]
    Client(String),

    #[error("Failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Kafka-compatible event bus handle
#[derive(Clone)]
pub struct EventBus {
    producer: FutureProducer,
    brokers: String,
    publish_timeout: Duration,
}

impl EventBus {
    /// Create a producer against the given brokers
    pub fn connect(brokers: &str) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "3000")
            .set("acks", "1")
            .create()
            .map_err(|e| BusError::Client(e.to_string()))?;

        Ok(Self {
            producer,
            brokers: brokers.to_string(),
            publish_timeout: Duration::from_secs(3),
        })
    }

    /// Publish a JSON record keyed by `key`. Per-key FIFO is preserved by
    /// the broker's partitioner.
    pub async fn publish<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_vec(value)?;
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        self.producer
            .send(record, Timeout::After(self.publish_timeout))
            .await
            .map_err(|(e, _)| BusError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Best-effort publish for side-effect paths: failures are logged, never
    /// propagated.
    pub async fn publish_best_effort<T: Serialize>(&self, topic: &str, key: &str, value: &T) {
        if let Err(e) = self.publish(topic, key, value).await {
            tracing::warn!(topic, key, error = %e, "Dropping event after publish failure");
        }
    }

    /// Create a stream consumer in `group_id` subscribed to `topics`
    pub fn consumer(&self, group_id: &str, topics: &[&str]) -> Result<StreamConsumer, BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(|e| BusError::Client(e.to_string()))?;

        consumer
            .subscribe(topics)
            .map_err(|e| BusError::Client(e.to_string()))?;

        Ok(consumer)
    }
}
