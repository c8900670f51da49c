//! # Cohort Sync Engine
//!
//! One-way reconciliation of locally managed cohorts, and their members,
//! against an external SQL table.
//!
//! The engine owns no storage. It reads the external side through
//! [`cohortsync_connector::ExternalSource`], mutates the local side through
//! [`LocalStore`], emits membership events through
//! [`cohortsync_events::EventPublisher`] and reports progress through a
//! [`ProgressTrace`].
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cohortsync_engine::prelude::*;
//!
//! let engine = SyncEngine::new(config, source, store, Arc::new(TracingPublisher), Arc::new(LogNotifier));
//! let report = engine.run(&TextTrace).await;
//! std::process::exit(report.exit_code);
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod notify;
pub mod probe;
pub mod reconciliation;
pub mod statistics;
pub mod store;
pub mod trace;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{
        EmptyCohortRemoval, FieldMapping, NotificationTarget, RemoveAction, SyncConfig,
        SyncPolicy, UserProvisioning,
    };
    pub use crate::error::{StoreError, StoreResult, SyncError, SyncResult};
    pub use crate::model::{Group, LocalUserField, Membership, NewGroup, NewUser, Recipient};
    pub use crate::notify::{LogNotifier, Notifier};
    pub use crate::probe::{probe, ProbeOutcome};
    pub use crate::reconciliation::{SyncEngine, SyncReport, SyncState};
    pub use crate::statistics::SyncStatistics;
    pub use crate::store::LocalStore;
    pub use crate::trace::{MemoryTrace, NullTrace, ProgressTrace, TextTrace};
    pub use cohortsync_events::{EventPublisher, TracingPublisher};
}

pub use config::{
    EmptyCohortRemoval, FieldMapping, NotificationTarget, RemoveAction, SyncConfig, SyncPolicy,
    UserProvisioning,
};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use model::{Group, LocalUserField, Membership, NewGroup, NewUser, Recipient};
pub use notify::{alert_administrators, LogNotifier, Notifier, NotifyError, ALERT_SUBJECT};
pub use probe::{probe, ProbeOutcome};
pub use reconciliation::{SyncEngine, SyncReport, SyncState};
pub use statistics::SyncStatistics;
pub use store::LocalStore;
pub use trace::{MemoryTrace, NullTrace, ProgressTrace, TextTrace};
