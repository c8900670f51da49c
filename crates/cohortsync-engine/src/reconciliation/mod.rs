//! # Cohort Reconciliation
//!
//! One-way sync of local cohorts and their members from an external table.
//!
//! ## Overview
//!
//! A pass runs these phases in order, aborting on the first fatal error:
//!
//! 1. Validate the mapping and connect to the external source
//! 2. Sanity gate: refuse to run against a suspiciously small table
//! 3. Cohort reconciliation: update names and descriptions, create new cohorts
//! 4. Membership reconciliation: remove stale members under a removal cap
//! 5. Member additions in bounded batches, with optional user provisioning
//! 6. Cleanup of empty, unreferenced cohorts
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        SyncEngine                          │
//! ├────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐    │
//! │  │   Cohort     │──►│  Membership  │──►│   Cleanup    │    │
//! │  │  Reconciler  │   │  Reconciler  │   │              │    │
//! │  └──────────────┘   └──────────────┘   └──────────────┘    │
//! │          │                  │ outbox                       │
//! │          ▼                  ▼                              │
//! │  ┌──────────────┐   ┌──────────────┐                       │
//! │  │  LocalStore  │   │    Event     │                       │
//! │  │              │   │  Publisher   │                       │
//! │  └──────────────┘   └──────────────┘                       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Membership events are queued by the reconciler and drained by the engine
//! right after each durable mutation, so a later failure never swallows the
//! events of work already committed.

mod cleanup;
mod cohorts;
mod engine;
mod members;

pub use cleanup::sweep_empty_cohorts;
pub use cohorts::{CohortOutcome, CohortReconciler};
pub use engine::{SyncEngine, SyncReport, SyncState};
pub use members::{MemberCounters, MembershipReconciler, StagedMember};

use cohortsync_connector::ExternalSource;

use crate::config::SyncConfig;
use crate::store::LocalStore;
use crate::trace::ProgressTrace;

/// Collaborators shared by every phase of a pass.
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub config: &'a SyncConfig,
    pub source: &'a dyn ExternalSource,
    pub store: &'a dyn LocalStore,
    pub trace: &'a dyn ProgressTrace,
}
