//! Envelopes carry event metadata alongside the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;
use crate::event::Event;

/// A typed event stamped with a fresh id and creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique per emitted event, so downstream consumers can drop duplicates.
    pub event_id: Uuid,
    /// E.g. "cohortsync.cohort.member.added"
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T: Event> EventEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: T::EVENT_TYPE.to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn topic(&self) -> &'static str {
        T::TOPIC
    }

    /// Erase the payload type so the envelope can go through a publisher
    /// trait object.
    pub fn into_raw(self) -> Result<RawEnvelope, EventError> {
        let payload =
            serde_json::to_value(&self.payload).map_err(|e| EventError::SerializationFailed {
                event_type: self.event_type.clone(),
                cause: e.to_string(),
            })?;

        Ok(RawEnvelope {
            event_id: self.event_id,
            event_type: self.event_type,
            topic: T::TOPIC.to_string(),
            timestamp: self.timestamp,
            payload,
        })
    }
}

/// Envelope with its payload already rendered to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl RawEnvelope {
    /// Reject envelopes outside the `cohortsync.` namespace before they are
    /// published.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.event_type.is_empty() {
            return Err(EventError::InvalidEnvelope {
                reason: "event_type is empty".to_string(),
            });
        }
        if !self.event_type.starts_with("cohortsync.") {
            return Err(EventError::InvalidEnvelope {
                reason: format!("event_type '{}' is not a cohortsync event", self.event_type),
            });
        }
        Ok(())
    }
}
