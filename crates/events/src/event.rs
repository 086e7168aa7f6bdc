use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Something that happened, addressed to subscribers by name.
pub trait Event: Send + Sync {
    /// Routing key (e.g. `"user.created"`).
    fn name(&self) -> &str;

    fn timestamp(&self) -> DateTime<Utc>;

    /// JSON view of the event data.
    fn payload(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// General-purpose event carrying a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: Uuid,
    name: String,
    timestamp: DateTime<Utc>,
    payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            name: name.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn into_payload(self) -> serde_json::Value {
        self.payload
    }
}

impl Event for EventEnvelope {
    fn name(&self) -> &str {
        &self.name
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn payload(&self) -> serde_json::Value {
        self.payload.clone()
    }
}
