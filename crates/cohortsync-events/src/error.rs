//! Error types for the cohortsync-events crate.

use thiserror::Error;

/// Errors raised while building or publishing an event.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Failed to publish to topic {topic}: {cause}")]
    PublishFailed { topic: String, cause: String },

    #[error("Failed to serialize event type {event_type}: {cause}")]
    SerializationFailed { event_type: String, cause: String },

    #[error("Invalid event envelope: {reason}")]
    InvalidEnvelope { reason: String },
}
