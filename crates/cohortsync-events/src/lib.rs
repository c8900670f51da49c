//! # cohortsync-events
//!
//! Membership events emitted by the cohort sync engine.
//!
//! Every durable membership change produces exactly one event. Events are
//! wrapped in an [`EventEnvelope`] carrying a unique id and timestamp, then
//! handed to an [`EventPublisher`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use cohortsync_events::{events::CohortMemberAdded, EventEnvelope, TracingPublisher};
//!
//! let envelope = EventEnvelope::new(CohortMemberAdded { cohort_id, user_id });
//! TracingPublisher.publish(envelope.into_raw()?).await?;
//! ```

pub mod envelope;
pub mod error;
pub mod event;
pub mod events;
pub mod publisher;

pub use envelope::{EventEnvelope, RawEnvelope};
pub use error::EventError;
pub use event::Event;
pub use events::{CohortEvent, CohortMemberAdded, CohortMemberRemoved, CohortSnapshot};
pub use publisher::{EventPublisher, TracingPublisher};
