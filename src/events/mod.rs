//! Outbound event contract: envelope construction and best-effort delivery.
//!
//! Publication runs strictly after the ledger commit and can never fail the
//! caller; downstream consumers reconcile by `version` or `timestamp`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::event_record;

pub const EVENT_SOURCE: &str = "inventory_service";
pub const ENVELOPE_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

/// Envelope delivered to the broker for every state-changing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub version: String,
}

impl EventEnvelope {
    pub fn new(event_type: &str, payload: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
            source: EVENT_SOURCE.to_string(),
            version: ENVELOPE_VERSION.to_string(),
        }
    }
}

/// Capability contract for the broker. The concrete implementation is wired
/// once at process start; the engine depends only on this trait.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), EventBusError>;

    /// Non-destructive liveness probe on the shared connection.
    async fn healthcheck(&self) -> Result<(), EventBusError>;
}

/// Publishes envelopes as JSON on a Redis channel.
pub struct RedisEventBus {
    conn: ConnectionManager,
}

impl RedisEventBus {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), EventBusError> {
        let message = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        let _subscribers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(message)
            .query_async(&mut conn)
            .await?;
        debug!(topic = %topic, event_type = %envelope.event_type, "event published");
        Ok(())
    }

    async fn healthcheck(&self) -> Result<(), EventBusError> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-process bus for the `memory` backend and the test suite; keeps every
/// published envelope for inspection.
#[derive(Default)]
pub struct MemoryEventBus {
    published: Mutex<Vec<(String, EventEnvelope)>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<(String, EventEnvelope)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), EventBusError> {
        self.published
            .lock()
            .await
            .push((topic.to_string(), envelope.clone()));
        Ok(())
    }

    async fn healthcheck(&self) -> Result<(), EventBusError> {
        Ok(())
    }
}

/// Fire-and-forget emission of typed state-change events.
///
/// Failures of the broker or the audit insert are logged and swallowed;
/// the ledger change has already been committed by the time this runs.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    db: Arc<DatabaseConnection>,
    topic: String,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>, db: Arc<DatabaseConnection>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            db,
            topic: topic.into(),
        }
    }

    pub async fn publish(&self, event_type: &str, payload: Value) {
        let envelope = EventEnvelope::new(event_type, payload);

        if let Err(e) = self.bus.publish(&self.topic, &envelope).await {
            warn!(
                event_type = %event_type,
                topic = %self.topic,
                error = %e,
                "event publication failed; ledger commit stands"
            );
        }

        if let Err(e) = self.record_audit(&envelope).await {
            warn!(event_type = %event_type, error = %e, "event audit insert failed");
        }
    }

    pub async fn healthcheck(&self) -> Result<(), EventBusError> {
        self.bus.healthcheck().await
    }

    async fn record_audit(&self, envelope: &EventEnvelope) -> Result<(), sea_orm::DbErr> {
        let record = event_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_type: Set(envelope.event_type.clone()),
            payload: Set(envelope.payload.to_string()),
            version: Set(1),
            created_at: Set(Utc::now()),
        };
        record.insert(&*self.db).await.map(|_| ())
    }
}
