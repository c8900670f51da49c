//! Sync pass orchestration.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use cohortsync_connector::ExternalSource;
use cohortsync_events::{CohortEvent, EventPublisher};

use super::{sweep_empty_cohorts, CohortReconciler, MembershipReconciler, SyncContext};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::notify::{alert_administrators, Notifier};
use crate::statistics::SyncStatistics;
use crate::store::LocalStore;
use crate::trace::ProgressTrace;

/// Lifecycle of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Configured,
    Connected,
    SanityChecked,
    GroupsReconciled,
    MembersReconciled,
    CleanedUp,
    Done,
    /// Aborted with the given exit code.
    Failed(i32),
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Done | SyncState::Failed(_))
    }
}

/// Outcome of [`SyncEngine::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub exit_code: i32,
    pub final_state: SyncState,
    pub statistics: SyncStatistics,
    /// Abort message, when the pass failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable abort classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs sync passes against one external source and one local store.
pub struct SyncEngine {
    config: SyncConfig,
    source: Arc<dyn ExternalSource>,
    store: Arc<dyn LocalStore>,
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn ExternalSource>,
        store: Arc<dyn LocalStore>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            publisher,
            notifier,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one pass.
    ///
    /// Never returns an error: the outcome, including abort details, is in
    /// the report. `trace.finished()` is called exactly once.
    #[instrument(skip_all, fields(source = %self.source.display_name()))]
    pub async fn run(&self, trace: &dyn ProgressTrace) -> SyncReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut state = SyncState::Idle;
        let mut stats = SyncStatistics::new();

        let result = self.execute(trace, &mut state, &mut stats).await;

        let (exit_code, error, error_code) = match result {
            Ok(()) => {
                state = SyncState::Done;
                (0, None, None)
            }
            Err(e) => {
                let code = e.exit_code();
                let message = e.to_string();
                error!(
                    error_code = e.error_code(),
                    exit_code = code,
                    failed_after = ?state,
                    "{message}"
                );
                trace.output(&message, 0);
                if e.notifies() {
                    alert_administrators(
                        self.store.as_ref(),
                        self.notifier.as_ref(),
                        self.config.notify,
                        &message,
                    )
                    .await;
                }
                state = SyncState::Failed(code);
                (code, Some(message), Some(e.error_code().to_string()))
            }
        };

        stats.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        trace.finished();

        info!(
            exit_code,
            groups_created = stats.groups_created,
            members_added = stats.members_added,
            members_removed = stats.members_removed,
            duration_ms = stats.duration_ms,
            "Cohort sync finished"
        );

        SyncReport {
            exit_code,
            final_state: state,
            statistics: stats,
            error,
            error_code,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn execute(
        &self,
        trace: &dyn ProgressTrace,
        state: &mut SyncState,
        stats: &mut SyncStatistics,
    ) -> SyncResult<()> {
        let ctx = SyncContext {
            config: &self.config,
            source: self.source.as_ref(),
            store: self.store.as_ref(),
            trace,
        };

        trace.output("Starting cohort synchronisation...", 0);
        self.config.validate()?;
        *state = SyncState::Configured;

        self.source
            .test_connection()
            .await
            .map_err(|source| SyncError::ConnectionFailure { source })?;
        *state = SyncState::Connected;

        self.sanity_check(ctx, stats).await?;
        *state = SyncState::SanityChecked;

        let groups = self.store.managed_groups().await?;
        let outcome = CohortReconciler::new(ctx).reconcile(groups).await?;
        stats.groups_updated = outcome.updated;
        stats.groups_created = outcome.created;
        stats.invalid_cohort_rows = outcome.invalid_rows;
        *state = SyncState::GroupsReconciled;

        trace.output("Starting cohort database user sync", 0);
        let mut members = MembershipReconciler::new(ctx);
        let result = self.reconcile_members(&mut members, &outcome, stats).await;
        members.counters().apply_to(stats);
        result?;
        *state = SyncState::MembersReconciled;

        stats.groups_cleaned_up = sweep_empty_cohorts(ctx).await?;
        *state = SyncState::CleanedUp;

        Ok(())
    }

    async fn sanity_check(&self, ctx: SyncContext<'_>, stats: &mut SyncStatistics) -> SyncResult<()> {
        let minimum = self.config.policy.min_records;
        if minimum == 0 {
            return Ok(());
        }

        let table = self.config.mapping.remote_table.trim();
        let count = match self.source.count_rows(table).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, table, "Could not count external rows");
                ctx.trace
                    .output(&format!("error: could not count external rows: {e}"), 1);
                0
            }
        };
        stats.external_records = count;

        if count < minimum {
            return Err(SyncError::SanityThresholdNotMet { count, minimum });
        }
        Ok(())
    }

    async fn reconcile_members(
        &self,
        members: &mut MembershipReconciler<'_>,
        outcome: &super::CohortOutcome,
        stats: &mut SyncStatistics,
    ) -> SyncResult<()> {
        for group in outcome.groups.values() {
            let result = members.reconcile_group(group).await;
            self.publish(members.drain_events(), stats).await;
            result?;
        }

        loop {
            let result = members.insert_next_batch().await;
            self.publish(members.drain_events(), stats).await;
            if !result? {
                break;
            }
        }
        Ok(())
    }

    /// Hand events to the publisher. Failures are counted, never fatal.
    async fn publish(&self, events: Vec<CohortEvent>, stats: &mut SyncStatistics) {
        for event in events {
            let event_type = event.event_type();
            let envelope = match event.into_envelope() {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, event_type, "Could not build event envelope");
                    stats.events_failed += 1;
                    continue;
                }
            };
            match self.publisher.publish(envelope).await {
                Ok(()) => stats.events_published += 1,
                Err(e) => {
                    warn!(error = %e, event_type, "Event publication failed");
                    stats.events_failed += 1;
                }
            }
        }
    }
}
