//! In-memory doubles for engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use cohortsync_connector::{
    Connector, ConnectorError, ConnectorResult, ExternalSource, FieldMap, RowIter, SelectQuery,
};
use cohortsync_engine::prelude::*;
use cohortsync_engine::NotifyError;
use cohortsync_events::{EventError, RawEnvelope};

/// Install a test subscriber once; output is captured by the test harness.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cohortsync_engine=debug")
        .with_test_writer()
        .try_init();
}

/// Mapping used by most tests: table `ext_cohorts` with lower-case columns.
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::new(FieldMapping {
        remote_table: "ext_cohorts".to_string(),
        remote_user_field: "username".into(),
        remote_cohort_id_field: "cohortid".into(),
        remote_cohort_name_field: "cohortname".into(),
        remote_cohort_desc_field: None,
        local_user_field: Some(LocalUserField::Username),
    });
    config.policy.min_records = 0;
    config.policy.max_removals = 0;
    config
}

/// One external row.
pub fn ext_row(cohort_id: &str, name: &str, username: &str) -> FieldMap {
    FieldMap::from_pairs([
        ("cohortid", cohort_id),
        ("cohortname", name),
        ("username", username),
    ])
}

// ---------------------------------------------------------------------------
// Local store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub idnumber: Option<String>,
    pub auth: String,
}

/// Operations the store can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    DeleteMemberships,
    InsertMemberships,
    CreateUser,
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub groups: BTreeMap<Uuid, Group>,
    pub memberships: HashSet<(Uuid, Uuid)>,
    pub users: Vec<TestUser>,
    pub consumers: HashSet<Uuid>,
    pub support: Option<Recipient>,
    pub admins: Vec<Recipient>,
    pub fail_on: Option<FailOn>,
    pub group_updates: usize,
    pub group_inserts: usize,
    pub membership_inserts: usize,
    pub membership_deletes: usize,
    /// Size of every delete call, in order.
    pub delete_batches: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().users.push(TestUser {
            id,
            username: username.to_string(),
            email: format!("{username}@example.edu"),
            idnumber: None,
            auth: "manual".to_string(),
        });
        id
    }

    pub fn add_group(&self, idnumber: &str, name: &str) -> Group {
        let group = NewGroup::managed(idnumber, name, None, Utc::now()).into_group(Uuid::new_v4());
        self.state
            .lock()
            .unwrap()
            .groups
            .insert(group.id, group.clone());
        group
    }

    /// A group owned by someone else.
    pub fn add_foreign_group(&self, idnumber: &str, name: &str) -> Group {
        let mut group =
            NewGroup::managed(idnumber, name, None, Utc::now()).into_group(Uuid::new_v4());
        group.component = String::new();
        self.state
            .lock()
            .unwrap()
            .groups
            .insert(group.id, group.clone());
        group
    }

    pub fn add_member(&self, group_id: Uuid, user_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .memberships
            .insert((group_id, user_id));
    }

    pub fn add_consumer(&self, group_id: Uuid) {
        self.state.lock().unwrap().consumers.insert(group_id);
    }

    pub fn fail_on(&self, op: FailOn) {
        self.state.lock().unwrap().fail_on = Some(op);
    }

    pub fn group(&self, idnumber: &str) -> Option<Group> {
        self.state
            .lock()
            .unwrap()
            .groups
            .values()
            .find(|g| g.idnumber == idnumber)
            .cloned()
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().unwrap().groups.len()
    }

    pub fn user_id(&self, username: &str) -> Option<Uuid> {
        self.state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .map(|u| u.id)
    }

    /// Usernames of a group's members, sorted.
    pub fn member_names(&self, group_id: Uuid) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .memberships
            .iter()
            .filter(|(g, _)| *g == group_id)
            .filter_map(|(_, u)| state.users.iter().find(|user| user.id == *u))
            .map(|u| u.username.clone())
            .collect();
        names.sort();
        names
    }

    pub fn membership_count(&self) -> usize {
        self.state.lock().unwrap().memberships.len()
    }

    fn check(&self, op: FailOn) -> StoreResult<()> {
        if self.state.lock().unwrap().fail_on == Some(op) {
            return Err(StoreError::database(format!("{op:?} failed")));
        }
        Ok(())
    }
}

fn user_key(user: &TestUser, field: LocalUserField) -> Option<String> {
    let value = match field {
        LocalUserField::Id => Some(user.id.to_string()),
        LocalUserField::IdNumber => user.idnumber.clone(),
        LocalUserField::Email => Some(user.email.clone()),
        LocalUserField::Username => Some(user.username.clone()),
    };
    value.filter(|v| !v.is_empty())
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn managed_groups(&self) -> StoreResult<BTreeMap<String, Group>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .groups
            .values()
            .filter(|g| g.is_managed())
            .map(|g| (g.idnumber.clone(), g.clone()))
            .collect())
    }

    async fn update_group(&self, group: &Group) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.group_updates += 1;
        state.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn insert_groups(&self, groups: &[NewGroup]) -> StoreResult<Vec<Group>> {
        let mut state = self.state.lock().unwrap();
        state.group_inserts += 1;
        Ok(groups
            .iter()
            .cloned()
            .map(|g| {
                let group = g.into_group(Uuid::new_v4());
                state.groups.insert(group.id, group.clone());
                group
            })
            .collect())
    }

    async fn group_member_keys(
        &self,
        group_id: Uuid,
        field: LocalUserField,
    ) -> StoreResult<HashMap<String, Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .memberships
            .iter()
            .filter(|(g, _)| *g == group_id)
            .filter_map(|(_, u)| state.users.iter().find(|user| user.id == *u))
            .filter_map(|u| user_key(u, field).map(|key| (key, u.id)))
            .collect())
    }

    async fn delete_memberships(&self, group_id: Uuid, user_ids: &[Uuid]) -> StoreResult<Vec<Uuid>> {
        self.check(FailOn::DeleteMemberships)?;
        let mut state = self.state.lock().unwrap();
        state.membership_deletes += 1;
        state.delete_batches.push(user_ids.len());
        Ok(user_ids
            .iter()
            .copied()
            .filter(|u| state.memberships.remove(&(group_id, *u)))
            .collect())
    }

    async fn insert_memberships(&self, memberships: &[Membership]) -> StoreResult<Vec<Membership>> {
        self.check(FailOn::InsertMemberships)?;
        let mut state = self.state.lock().unwrap();
        state.membership_inserts += 1;
        Ok(memberships
            .iter()
            .filter(|m| state.memberships.insert((m.group_id, m.user_id)))
            .cloned()
            .collect())
    }

    async fn find_user_id(&self, field: LocalUserField, value: &str) -> StoreResult<Option<Uuid>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| user_key(u, field).is_some_and(|k| k.eq_ignore_ascii_case(value)))
            .map(|u| u.id))
    }

    async fn create_user(&self, user: &NewUser) -> StoreResult<Uuid> {
        self.check(FailOn::CreateUser)?;
        let id = Uuid::new_v4();
        self.state.lock().unwrap().users.push(TestUser {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            idnumber: user.idnumber.clone(),
            auth: user.auth.clone(),
        });
        Ok(id)
    }

    async fn group_is_referenced(&self, group_id: Uuid) -> StoreResult<bool> {
        Ok(self.state.lock().unwrap().consumers.contains(&group_id))
    }

    async fn delete_unreferenced_empty_groups(&self) -> StoreResult<u64> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let doomed: Vec<Uuid> = state
            .groups
            .values()
            .filter(|g| g.is_managed())
            .filter(|g| !state.consumers.contains(&g.id))
            .filter(|g| !state.memberships.iter().any(|(group, _)| *group == g.id))
            .map(|g| g.id)
            .collect();
        for id in &doomed {
            state.groups.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn support_contact(&self) -> StoreResult<Option<Recipient>> {
        Ok(self.state.lock().unwrap().support.clone())
    }

    async fn site_administrators(&self) -> StoreResult<Vec<Recipient>> {
        Ok(self.state.lock().unwrap().admins.clone())
    }
}

// ---------------------------------------------------------------------------
// External source
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SourceState {
    pub rows: Vec<FieldMap>,
    pub unreachable: bool,
    pub count_fails: bool,
    /// Fail every query whose filter is on this cohort id.
    pub fail_cohort: Option<String>,
    /// Fail every query.
    pub fail_queries: bool,
    pub queries: Vec<SelectQuery>,
}

/// Rows held in memory; queries are evaluated structurally.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pub state: Arc<Mutex<SourceState>>,
}

impl StaticSource {
    pub fn new(rows: Vec<FieldMap>) -> Self {
        let source = Self::default();
        source.state.lock().unwrap().rows = rows;
        source
    }

    pub fn set_rows(&self, rows: Vec<FieldMap>) {
        self.state.lock().unwrap().rows = rows;
    }

    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().unreachable = true;
        self
    }

    pub fn failing_queries(self) -> Self {
        self.state.lock().unwrap().fail_queries = true;
        self
    }

    pub fn failing_count(self) -> Self {
        self.state.lock().unwrap().count_fails = true;
        self
    }

    pub fn failing_cohort(self, cohort_id: &str) -> Self {
        self.state.lock().unwrap().fail_cohort = Some(cohort_id.to_string());
        self
    }

    pub fn queries(&self) -> Vec<SelectQuery> {
        self.state.lock().unwrap().queries.clone()
    }
}

#[async_trait]
impl Connector for StaticSource {
    fn display_name(&self) -> &str {
        "static"
    }

    async fn test_connection(&self) -> ConnectorResult<()> {
        if self.state.lock().unwrap().unreachable {
            return Err(ConnectorError::connection_failed("connection refused"));
        }
        Ok(())
    }

    async fn dispose(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ExternalSource for StaticSource {
    async fn query(&self, query: &SelectQuery) -> ConnectorResult<RowIter> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(query.clone());

        let targets_failing_cohort = state.fail_cohort.as_ref().is_some_and(|cohort| {
            query
                .conditions()
                .iter()
                .any(|(_, value)| value == cohort)
        });
        if state.fail_queries || targets_failing_cohort {
            return Err(ConnectorError::query_failed("table is locked"));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let rows: Vec<FieldMap> = state
            .rows
            .iter()
            .filter(|row| query.matches(row))
            .map(|row| {
                if query.fields().is_empty() {
                    row.clone()
                } else {
                    row.project(query.fields())
                }
            })
            .filter(|row| !query.is_distinct() || seen.insert(row.to_json()))
            .collect();
        Ok(Box::new(rows.into_iter()))
    }

    async fn count_rows(&self, _table: &str) -> ConnectorResult<u64> {
        let state = self.state.lock().unwrap();
        if state.count_fails {
            return Err(ConnectorError::query_failed("count failed"));
        }
        Ok(state.rows.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Publisher and notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    pub events: Arc<Mutex<Vec<RawEnvelope>>>,
    pub fail: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    pub fn envelopes(&self) -> Vec<RawEnvelope> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, envelope: RawEnvelope) -> Result<(), EventError> {
        if self.fail {
            return Err(EventError::PublishFailed {
                topic: envelope.topic,
                cause: "broker down".to_string(),
            });
        }
        self.events.lock().unwrap().push(envelope);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    /// (recipient email, subject, body)
    pub sent: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipient: &Recipient,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((
            recipient.email.clone(),
            subject.to_string(),
            body.to_string(),
        ));
        Ok(())
    }
}

pub fn admin(email: &str) -> Recipient {
    Recipient {
        user_id: Some(Uuid::new_v4()),
        email: email.to_string(),
        display_name: "Admin".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: MemoryStore,
    pub source: StaticSource,
    pub publisher: RecordingPublisher,
    pub notifier: RecordingNotifier,
    pub trace: MemoryTrace,
}

impl Harness {
    pub fn new(rows: Vec<FieldMap>) -> Self {
        init_test_logging();
        Self {
            store: MemoryStore::new(),
            source: StaticSource::new(rows),
            publisher: RecordingPublisher::default(),
            notifier: RecordingNotifier::default(),
            trace: MemoryTrace::new(),
        }
    }

    pub fn engine(&self, config: SyncConfig) -> SyncEngine {
        SyncEngine::new(
            config,
            Arc::new(self.source.clone()),
            Arc::new(self.store.clone()),
            Arc::new(self.publisher.clone()),
            Arc::new(self.notifier.clone()),
        )
    }

    pub async fn run(&self, config: SyncConfig) -> SyncReport {
        self.engine(config).run(&self.trace).await
    }
}
