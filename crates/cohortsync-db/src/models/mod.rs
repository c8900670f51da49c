//! Row types.

pub mod cohort;
pub mod user;

pub use cohort::{CohortMemberRow, CohortRow, COHORT_COLUMNS};
pub use user::{key_expression, RecipientRow};
