//! Event publishing.

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::envelope::RawEnvelope;
use crate::error::EventError;

/// Destination for emitted events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single envelope.
    async fn publish(&self, envelope: RawEnvelope) -> Result<(), EventError>;
}

/// Writes each event to the `cohortsync::events` tracing target.
///
/// Downstream consumers can route that target to a file or a log shipper.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    #[instrument(skip(self, envelope), fields(
        event_id = %envelope.event_id,
        event_type = %envelope.event_type
    ))]
    async fn publish(&self, envelope: RawEnvelope) -> Result<(), EventError> {
        envelope.validate()?;

        let payload =
            serde_json::to_string(&envelope.payload).map_err(|e| EventError::PublishFailed {
                topic: envelope.topic.clone(),
                cause: e.to_string(),
            })?;

        info!(
            target: "cohortsync::events",
            topic = %envelope.topic,
            timestamp = %envelope.timestamp,
            payload = %payload,
            "Event published"
        );
        Ok(())
    }
}
