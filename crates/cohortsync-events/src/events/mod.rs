//! Built-in event types.

pub mod cohort;

pub use cohort::{CohortEvent, CohortMemberAdded, CohortMemberRemoved, CohortSnapshot};
