//! Event trait definition for type-safe event publishing.

use serde::{de::DeserializeOwned, Serialize};

/// Trait for types that can be published as events.
///
/// # Example
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use cohortsync_events::Event;
/// use uuid::Uuid;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// pub struct CohortRenamed {
///     pub cohort_id: Uuid,
///     pub name: String,
/// }
///
/// impl Event for CohortRenamed {
///     const TOPIC: &'static str = "cohortsync.cohort.renamed";
///     const EVENT_TYPE: &'static str = "cohortsync.cohort.renamed";
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The topic events of this type are published to.
    const TOPIC: &'static str;

    /// The fully qualified event type name.
    ///
    /// Convention: `cohortsync.<entity>.<action>`
    const EVENT_TYPE: &'static str;
}
