//! Membership reconciliation.
//!
//! Removals happen group by group as each group is visited. Additions are
//! only staged during that walk and applied afterwards in bounded batches,
//! each batch resolving its external keys to local users first.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use cohortsync_connector::{FieldMap, FieldName, SelectQuery};
use cohortsync_events::{CohortEvent, CohortMemberAdded, CohortMemberRemoved};

use super::SyncContext;
use crate::config::{EmptyCohortRemoval, RemoveAction};
use crate::error::{SyncError, SyncResult};
use crate::model::{Group, LocalUserField, Membership, NewUser};
use crate::statistics::SyncStatistics;

/// An external member waiting to be added to a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMember {
    pub group_id: Uuid,
    /// External user key as read, trimmed.
    pub key: String,
}

/// Counters kept by the membership phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberCounters {
    pub invalid_rows: u64,
    pub groups_processed: u64,
    pub added: u64,
    pub removed: u64,
    pub unresolved: u64,
    pub users_created: u64,
}

impl MemberCounters {
    /// Copy into the run statistics.
    pub fn apply_to(&self, stats: &mut SyncStatistics) {
        stats.invalid_member_rows = self.invalid_rows;
        stats.groups_processed = self.groups_processed;
        stats.members_added = self.added;
        stats.members_removed = self.removed;
        stats.unresolved_users = self.unresolved;
        stats.users_created = self.users_created;
    }
}

/// Reconciles the members of every managed group.
///
/// Events for committed mutations accumulate in an outbox that the caller
/// drains with [`MembershipReconciler::drain_events`].
pub struct MembershipReconciler<'a> {
    ctx: SyncContext<'a>,
    field: LocalUserField,
    staged: Vec<StagedMember>,
    staged_keys: HashSet<(Uuid, String)>,
    cursor: usize,
    /// Lower-cased external key to local user, misses included.
    resolved: HashMap<String, Option<Uuid>>,
    /// Lower-cased keys already handed to provisioning.
    provisioned: HashSet<String>,
    outbox: Vec<CohortEvent>,
    counters: MemberCounters,
}

impl<'a> MembershipReconciler<'a> {
    pub fn new(ctx: SyncContext<'a>) -> Self {
        Self {
            field: ctx.config.local_user_field(),
            ctx,
            staged: Vec::new(),
            staged_keys: HashSet::new(),
            cursor: 0,
            resolved: HashMap::new(),
            provisioned: HashSet::new(),
            outbox: Vec::new(),
            counters: MemberCounters::default(),
        }
    }

    pub fn counters(&self) -> MemberCounters {
        self.counters
    }

    /// Members staged for addition so far.
    pub fn staged(&self) -> &[StagedMember] {
        &self.staged
    }

    /// Take the events queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<CohortEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Compare one group with its external member list.
    ///
    /// Stale members are removed immediately when policy allows. New members
    /// are only staged. Fails with [`SyncError::ReadFailure`] when the
    /// group's external members cannot be read.
    #[instrument(skip_all, fields(group_id = %group.id, idnumber = %group.idnumber))]
    pub async fn reconcile_group(&mut self, group: &Group) -> SyncResult<()> {
        let config = self.ctx.config;
        let mapping = &config.mapping;

        let mut current: HashMap<String, Uuid> = self
            .ctx
            .store
            .group_member_keys(group.id, self.field)
            .await?
            .into_iter()
            .map(|(key, user_id)| (key.to_lowercase(), user_id))
            .collect();

        let query = SelectQuery::new(mapping.remote_table.trim())
            .select([mapping.remote_user_field.clone()])
            .distinct()
            .filter(mapping.remote_cohort_id_field.clone(), group.idnumber.clone());

        let rows = self
            .ctx
            .source
            .query(&query)
            .await
            .map_err(|source| SyncError::ReadFailure { source })?;

        let mut confirmed: HashSet<String> = HashSet::new();
        let mut found_external = false;

        for row in rows {
            let Some(key) = row.get_trimmed(&mapping.remote_user_field) else {
                self.counters.invalid_rows += 1;
                self.ctx.trace.output(
                    &format!(
                        "error: invalid external cohort record, user fields is mandatory: {}",
                        row.to_json()
                    ),
                    1,
                );
                continue;
            };
            found_external = true;

            let lower = key.to_lowercase();
            if current.remove(&lower).is_some() {
                confirmed.insert(lower);
            } else if !confirmed.contains(&lower)
                && self.staged_keys.insert((group.id, lower))
            {
                self.staged.push(StagedMember {
                    group_id: group.id,
                    key: key.to_string(),
                });
            }
        }

        self.counters.groups_processed += 1;

        if config.policy.remove_action == RemoveAction::Keep || current.is_empty() {
            return Ok(());
        }
        if !self.removal_allowed(group, found_external).await? {
            debug!("No external members, removal not allowed by policy");
            return Ok(());
        }

        self.remove_members(group, current).await
    }

    async fn removal_allowed(&self, group: &Group, found_external: bool) -> SyncResult<bool> {
        if found_external {
            return Ok(true);
        }
        Ok(match self.ctx.config.policy.empty_cohort_removal {
            EmptyCohortRemoval::Never => false,
            EmptyCohortRemoval::Always => true,
            EmptyCohortRemoval::IfNotReferenced => {
                !self.ctx.store.group_is_referenced(group.id).await?
            }
        })
    }

    async fn remove_members(
        &mut self,
        group: &Group,
        stale: HashMap<String, Uuid>,
    ) -> SyncResult<()> {
        let pending = stale.len() as u64;
        let max_removals = self.ctx.config.policy.max_removals;
        if max_removals > 0 && self.counters.removed + pending > max_removals {
            return Err(SyncError::RemovalCapExceeded {
                already_removed: self.counters.removed,
                pending,
                max_removals,
                group_id: group.id,
            });
        }

        let mut user_ids: Vec<Uuid> = stale.into_values().collect();
        user_ids.sort_unstable();

        let snapshot = group.snapshot();
        for chunk in user_ids.chunks(self.ctx.config.chunk_size()) {
            let deleted = self.ctx.store.delete_memberships(group.id, chunk).await?;
            self.counters.removed += deleted.len() as u64;
            self.ctx.trace.output(
                &format!(
                    "Bulk delete of {} users from cohortid {}",
                    deleted.len(),
                    group.id
                ),
                1,
            );
            self.outbox.extend(deleted.into_iter().map(|user_id| {
                CohortEvent::from(CohortMemberRemoved {
                    cohort_id: group.id,
                    user_id,
                    cohort: snapshot.clone(),
                })
            }));
        }
        Ok(())
    }

    /// Resolve and insert the next batch of staged members.
    ///
    /// Returns `false` once every staged member has been processed.
    #[instrument(skip_all, fields(cursor = self.cursor, staged = self.staged.len()))]
    pub async fn insert_next_batch(&mut self) -> SyncResult<bool> {
        if self.cursor >= self.staged.len() {
            return Ok(false);
        }
        let end = (self.cursor + self.ctx.config.chunk_size()).min(self.staged.len());
        let batch = self.staged[self.cursor..end].to_vec();
        self.cursor = end;

        let now = Utc::now();
        let mut memberships: Vec<Membership> = Vec::new();
        let mut pairs: HashSet<(Uuid, Uuid)> = HashSet::new();
        let mut missing: BTreeMap<String, String> = BTreeMap::new();

        for member in &batch {
            match self.resolve(&member.key).await? {
                Some(user_id) => {
                    if pairs.insert((member.group_id, user_id)) {
                        memberships.push(Membership {
                            group_id: member.group_id,
                            user_id,
                            added_at: now,
                        });
                    }
                }
                None => {
                    self.counters.unresolved += 1;
                    self.ctx.trace.output(
                        &format!("Could not find user with {} = {}", self.field, member.key),
                        1,
                    );
                    missing
                        .entry(member.key.to_lowercase())
                        .or_insert_with(|| member.key.clone());
                }
            }
        }

        if self.ctx.config.provisioning.enabled && !missing.is_empty() {
            self.provision(missing).await;
        }

        if !memberships.is_empty() {
            let inserted = self.ctx.store.insert_memberships(&memberships).await?;
            self.counters.added += inserted.len() as u64;
            self.ctx.trace.output(
                &format!("Bulk insert of {} new members", inserted.len()),
                1,
            );
            self.outbox.extend(inserted.into_iter().map(|m| {
                CohortEvent::from(CohortMemberAdded {
                    cohort_id: m.group_id,
                    user_id: m.user_id,
                })
            }));
        }

        Ok(self.cursor < self.staged.len())
    }

    async fn resolve(&mut self, key: &str) -> SyncResult<Option<Uuid>> {
        let lower = key.to_lowercase();
        if let Some(hit) = self.resolved.get(&lower) {
            return Ok(*hit);
        }
        let user_id = self.ctx.store.find_user_id(self.field, key).await?;
        self.resolved.insert(lower, user_id);
        Ok(user_id)
    }

    /// Create local accounts for unresolved keys.
    ///
    /// Accounts take effect on the next pass. Every failure here is traced
    /// and otherwise ignored.
    async fn provision(&mut self, missing: BTreeMap<String, String>) {
        let keys: Vec<String> = missing
            .into_iter()
            .filter(|(lower, _)| self.provisioned.insert(lower.clone()))
            .map(|(_, key)| key)
            .collect();
        if keys.is_empty() {
            return;
        }

        let mapping = &self.ctx.config.mapping;
        let provisioning = &self.ctx.config.provisioning;
        let query = SelectQuery::new(mapping.remote_table.trim())
            .select(provisioning.profile_fields())
            .distinct()
            .filter_in(mapping.remote_user_field.clone(), keys);

        let rows = match self.ctx.source.query(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Could not read profiles of missing users");
                self.ctx
                    .trace
                    .output(&format!("error: could not read user profiles: {e}"), 1);
                return;
            }
        };

        let mut created = 0u64;
        let mut usernames: HashSet<String> = HashSet::new();
        for row in rows {
            let Some(user) = self.profile(&row) else {
                self.ctx.trace.output(
                    &format!(
                        "error: invalid external user record, username is mandatory: {}",
                        row.to_json()
                    ),
                    1,
                );
                continue;
            };
            if !usernames.insert(user.username.to_lowercase()) {
                continue;
            }
            match self.ctx.store.create_user(&user).await {
                Ok(user_id) => {
                    created += 1;
                    debug!(%user_id, username = %user.username, "Provisioned user");
                }
                Err(e) => {
                    warn!(error = %e, username = %user.username, "User creation failed");
                    self.ctx.trace.output(
                        &format!("error: could not create user {}: {e}", user.username),
                        1,
                    );
                }
            }
        }

        self.counters.users_created += created;
        self.ctx
            .trace
            .output(&format!("Created {created} new users"), 1);
        info!(created, "User provisioning finished");
    }

    fn profile(&self, row: &FieldMap) -> Option<NewUser> {
        let provisioning = &self.ctx.config.provisioning;
        let text = |field: &FieldName| row.get_trimmed(field).unwrap_or_default().to_string();
        let username = row.get_trimmed(&provisioning.username_field)?;
        Some(NewUser {
            username: username.to_lowercase(),
            email: text(&provisioning.email_field),
            first_name: text(&provisioning.first_name_field),
            last_name: text(&provisioning.last_name_field),
            idnumber: provisioning
                .idnumber_field()
                .and_then(|field| row.get_trimmed(field))
                .map(str::to_string),
            auth: provisioning.auth.clone(),
        })
    }
}
