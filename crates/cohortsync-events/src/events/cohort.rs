//! Cohort membership events.
//!
//! Published after a membership row has been durably inserted or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{EventEnvelope, RawEnvelope};
use crate::error::EventError;
use crate::event::Event;

/// State of a cohort at the moment a member was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortSnapshot {
    pub id: Uuid,
    pub idnumber: String,
    pub name: String,
    pub description: Option<String>,
    pub component: String,
    pub context_id: i64,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Published when a user is added to a cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortMemberAdded {
    /// The cohort's ID.
    pub cohort_id: Uuid,
    /// The user ID that was added.
    pub user_id: Uuid,
}

impl Event for CohortMemberAdded {
    const TOPIC: &'static str = "cohortsync.cohort.member.added";
    const EVENT_TYPE: &'static str = "cohortsync.cohort.member.added";
}

/// Published when a user is removed from a cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortMemberRemoved {
    /// The cohort's ID.
    pub cohort_id: Uuid,
    /// The user ID that was removed.
    pub user_id: Uuid,
    /// Cohort state when the removal happened.
    pub cohort: CohortSnapshot,
}

impl Event for CohortMemberRemoved {
    const TOPIC: &'static str = "cohortsync.cohort.member.removed";
    const EVENT_TYPE: &'static str = "cohortsync.cohort.member.removed";
}

/// Any event the sync engine emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CohortEvent {
    MemberAdded(CohortMemberAdded),
    MemberRemoved(CohortMemberRemoved),
}

impl CohortEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CohortEvent::MemberAdded(_) => CohortMemberAdded::EVENT_TYPE,
            CohortEvent::MemberRemoved(_) => CohortMemberRemoved::EVENT_TYPE,
        }
    }

    pub fn cohort_id(&self) -> Uuid {
        match self {
            CohortEvent::MemberAdded(e) => e.cohort_id,
            CohortEvent::MemberRemoved(e) => e.cohort_id,
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            CohortEvent::MemberAdded(e) => e.user_id,
            CohortEvent::MemberRemoved(e) => e.user_id,
        }
    }

    /// Wrap in a fresh envelope and erase the payload type.
    pub fn into_envelope(self) -> Result<RawEnvelope, EventError> {
        match self {
            CohortEvent::MemberAdded(e) => EventEnvelope::new(e).into_raw(),
            CohortEvent::MemberRemoved(e) => EventEnvelope::new(e).into_raw(),
        }
    }
}

impl From<CohortMemberAdded> for CohortEvent {
    fn from(event: CohortMemberAdded) -> Self {
        CohortEvent::MemberAdded(event)
    }
}

impl From<CohortMemberRemoved> for CohortEvent {
    fn from(event: CohortMemberRemoved) -> Self {
        CohortEvent::MemberRemoved(event)
    }
}
