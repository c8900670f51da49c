//! Removal of empty managed cohorts.

use tracing::info;

use super::SyncContext;
use crate::error::SyncResult;

/// Delete managed cohorts that have no members and no enrolment consumer.
pub async fn sweep_empty_cohorts(ctx: SyncContext<'_>) -> SyncResult<u64> {
    let removed = ctx.store.delete_unreferenced_empty_groups().await?;
    if removed > 0 {
        ctx.trace
            .output(&format!("Removed {removed} empty cohorts"), 0);
    }
    info!(removed, "Empty cohort cleanup finished");
    Ok(removed)
}
