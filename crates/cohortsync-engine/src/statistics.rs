//! Run statistics.

use serde::{Deserialize, Serialize};

/// Counters for one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    /// Rows counted by the sanity gate.
    #[serde(default)]
    pub external_records: u64,
    /// Cohort rows rejected for a missing id or name.
    #[serde(default)]
    pub invalid_cohort_rows: u64,
    /// Member rows rejected for a missing user key.
    #[serde(default)]
    pub invalid_member_rows: u64,
    #[serde(default)]
    pub groups_updated: u64,
    #[serde(default)]
    pub groups_created: u64,
    /// Groups whose membership was reconciled.
    #[serde(default)]
    pub groups_processed: u64,
    #[serde(default)]
    pub members_added: u64,
    #[serde(default)]
    pub members_removed: u64,
    /// External member keys with no local user.
    #[serde(default)]
    pub unresolved_users: u64,
    #[serde(default)]
    pub users_created: u64,
    #[serde(default)]
    pub groups_cleaned_up: u64,
    #[serde(default)]
    pub events_published: u64,
    /// Events that could not be handed to the publisher.
    #[serde(default)]
    pub events_failed: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl SyncStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total membership mutations.
    #[must_use]
    pub fn membership_changes(&self) -> u64 {
        self.members_added + self.members_removed
    }

    /// Whether the pass changed anything in the local store.
    #[must_use]
    pub fn has_mutations(&self) -> bool {
        self.groups_updated
            + self.groups_created
            + self.membership_changes()
            + self.users_created
            + self.groups_cleaned_up
            > 0
    }
}
