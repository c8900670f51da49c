//! Cohort reconciliation: names, descriptions and creation.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, instrument};

use cohortsync_connector::{FieldName, SelectQuery};

use super::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::model::{Group, NewGroup};

/// What the cohort phase did.
#[derive(Debug, Clone, Default)]
pub struct CohortOutcome {
    pub updated: u64,
    pub created: u64,
    pub invalid_rows: u64,
    /// Managed groups after the phase, indexed by idnumber.
    pub groups: BTreeMap<String, Group>,
}

/// Brings local cohorts in line with the distinct cohorts of the external table.
pub struct CohortReconciler<'a> {
    ctx: SyncContext<'a>,
}

impl<'a> CohortReconciler<'a> {
    pub fn new(ctx: SyncContext<'a>) -> Self {
        Self { ctx }
    }

    fn query(&self) -> SelectQuery {
        let mapping = &self.ctx.config.mapping;
        let mut fields = vec![
            mapping.remote_cohort_id_field.clone(),
            mapping.remote_cohort_name_field.clone(),
        ];
        if let Some(desc) = mapping.description_field() {
            fields.push(desc.clone());
        }
        SelectQuery::new(mapping.remote_table.trim())
            .select(fields)
            .distinct()
    }

    /// Reconcile against `groups`, the current managed groups.
    ///
    /// Fails with [`SyncError::ReadFailure`] when the external table cannot be
    /// read; invalid rows are traced and skipped.
    #[instrument(skip_all)]
    pub async fn reconcile(&self, mut groups: BTreeMap<String, Group>) -> SyncResult<CohortOutcome> {
        let config = self.ctx.config;
        let mapping = &config.mapping;
        let desc_field: Option<&FieldName> = mapping.description_field();
        let write_descriptions = config.policy.update_descriptions && desc_field.is_some();

        let rows = self
            .ctx
            .source
            .query(&self.query())
            .await
            .map_err(|source| SyncError::ReadFailure { source })?;

        let now = Utc::now();
        let mut outcome = CohortOutcome::default();
        let mut staged_ids: HashSet<String> = HashSet::new();
        let mut new_groups: Vec<NewGroup> = Vec::new();

        for row in rows {
            let (Some(idnumber), Some(name)) = (
                row.get_trimmed(&mapping.remote_cohort_id_field),
                row.get_trimmed(&mapping.remote_cohort_name_field),
            ) else {
                outcome.invalid_rows += 1;
                self.ctx.trace.output(
                    &format!(
                        "error: invalid external cohort record, id and name are mandatory: {}",
                        row.to_json()
                    ),
                    1,
                );
                continue;
            };
            let description = desc_field
                .and_then(|field| row.get_trimmed(field))
                .map(str::to_string);

            if let Some(group) = groups.get_mut(idnumber) {
                let rename = group.name != name;
                let redescribe = write_descriptions && group.description != description;
                if !rename && !redescribe {
                    continue;
                }

                group.name = name.to_string();
                if redescribe {
                    group.description = description;
                }
                group.modified_at = now;
                self.ctx.store.update_group(group).await?;
                outcome.updated += 1;
                debug!(group_id = %group.id, idnumber = %idnumber, "Updated cohort");
            } else if staged_ids.insert(idnumber.to_string()) {
                new_groups.push(NewGroup::managed(idnumber, name, description, now));
            }
        }

        self.ctx.trace.output(
            &format!("Updated {} cohort names/descriptions", outcome.updated),
            0,
        );

        if !new_groups.is_empty() {
            let created = self.ctx.store.insert_groups(&new_groups).await?;
            outcome.created = created.len() as u64;
            self.ctx.trace.output(
                &format!("Bulk insert of {} new cohorts", outcome.created),
                0,
            );
            groups = self.ctx.store.managed_groups().await?;
        }

        info!(
            updated = outcome.updated,
            created = outcome.created,
            invalid = outcome.invalid_rows,
            "Cohort reconciliation finished"
        );

        outcome.groups = groups;
        Ok(outcome)
    }
}
