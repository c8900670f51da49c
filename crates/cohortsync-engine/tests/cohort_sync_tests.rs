//! End-to-end sync passes against in-memory doubles.

mod common;

use cohortsync_connector::FieldMap;
use cohortsync_engine::prelude::*;
use cohortsync_events::{CohortMemberAdded, CohortMemberRemoved, Event};

use common::{admin, ext_row, test_config, FailOn, Harness, RecordingPublisher, StaticSource};

fn notify_admins(config: &mut SyncConfig, harness: &Harness) {
    config.notify = NotificationTarget::AllAdmins;
    harness.store.state.lock().unwrap().admins = vec![admin("ops@example.edu")];
}

// =============================================================================
// Cohort reconciliation
// =============================================================================

#[tokio::test]
async fn test_new_cohorts_are_created() {
    let harness = Harness::new(vec![
        ext_row("G1", "Alpha", "alice"),
        ext_row("G2", "Beta", "bob"),
    ]);
    harness.store.add_user("alice");
    harness.store.add_user("bob");
    let mut config = test_config();
    config.policy.min_records = 1;

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.final_state, SyncState::Done);
    assert_eq!(report.statistics.groups_created, 2);
    assert_eq!(report.statistics.groups_updated, 0);
    assert!(harness.trace.contains("Updated 0 cohort names/descriptions"));
    assert!(harness.trace.contains("Bulk insert of 2 new cohorts"));

    let alpha = harness.store.group("G1").unwrap();
    assert_eq!(alpha.name, "Alpha");
    assert!(alpha.visible);
    assert!(alpha.is_managed());
    assert_eq!(harness.store.member_names(alpha.id), vec!["alice"]);
    assert_eq!(harness.store.group("G2").unwrap().name, "Beta");
}

#[tokio::test]
async fn test_changed_name_updates_group() {
    let harness = Harness::new(vec![ext_row("G1", "AlphaX", "alice")]);
    let alice = harness.store.add_user("alice");
    let group = harness.store.add_group("G1", "Alpha");
    harness.store.add_member(group.id, alice);

    let report = harness.run(test_config()).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.statistics.groups_updated, 1);
    assert_eq!(report.statistics.groups_created, 0);
    let updated = harness.store.group("G1").unwrap();
    assert_eq!(updated.id, group.id);
    assert_eq!(updated.name, "AlphaX");
    assert!(updated.modified_at >= group.modified_at);
    assert!(harness.trace.contains("Updated 1 cohort names/descriptions"));
}

#[tokio::test]
async fn test_descriptions_follow_update_policy() {
    let rows = vec![FieldMap::from_pairs([
        ("cohortid", "G1"),
        ("cohortname", "Alpha"),
        ("cohortdesc", "First years"),
        ("username", "alice"),
    ])];
    let harness = Harness::new(rows);
    let alice = harness.store.add_user("alice");
    let group = harness.store.add_group("G1", "Alpha");
    harness.store.add_member(group.id, alice);

    let mut config = test_config();
    config.mapping.remote_cohort_desc_field = Some("cohortdesc".into());

    let report = harness.run(config.clone()).await;
    assert_eq!(report.statistics.groups_updated, 0);
    assert_eq!(harness.store.group("G1").unwrap().description, None);

    config.policy.update_descriptions = true;
    let report = harness.run(config).await;
    assert_eq!(report.statistics.groups_updated, 1);
    assert_eq!(
        harness.store.group("G1").unwrap().description.as_deref(),
        Some("First years")
    );
}

#[tokio::test]
async fn test_new_group_takes_description_when_column_configured() {
    let rows = vec![FieldMap::from_pairs([
        ("cohortid", "G7"),
        ("cohortname", "Seventh"),
        ("cohortdesc", "  padded  "),
        ("username", "alice"),
    ])];
    let harness = Harness::new(rows);
    harness.store.add_user("alice");
    let mut config = test_config();
    config.mapping.remote_cohort_desc_field = Some("cohortdesc".into());

    harness.run(config).await;

    assert_eq!(
        harness.store.group("G7").unwrap().description.as_deref(),
        Some("padded")
    );
}

#[tokio::test]
async fn test_invalid_cohort_rows_are_skipped() {
    let harness = Harness::new(vec![
        ext_row("G1", "Alpha", "alice"),
        ext_row("G2", "   ", "alice"),
        FieldMap::from_pairs([("cohortname", "Orphan"), ("username", "alice")]),
    ]);
    harness.store.add_user("alice");

    let report = harness.run(test_config()).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.statistics.groups_created, 1);
    assert_eq!(report.statistics.invalid_cohort_rows, 2);
    assert!(harness.store.group("G2").is_none());
    assert!(harness
        .trace
        .contains("error: invalid external cohort record, id and name are mandatory:"));
    assert!(harness.trace.contains("\"cohortname\":\"Orphan\""));
}

#[tokio::test]
async fn test_whitespace_is_trimmed_from_ids_and_names() {
    let harness = Harness::new(vec![
        ext_row("  G1 ", " Alpha  ", "alice"),
        ext_row("G1", "Alpha", "alice"),
    ]);
    harness.store.add_user("alice");

    let report = harness.run(test_config()).await;

    assert_eq!(report.statistics.groups_created, 1);
    let group = harness.store.group("G1").unwrap();
    assert_eq!(group.name, "Alpha");
}

#[tokio::test]
async fn test_duplicate_external_ids_create_one_group() {
    let harness = Harness::new(vec![
        ext_row("G1", "Alpha", "alice"),
        ext_row("G1", "Alpha (dup)", "bob"),
    ]);
    harness.store.add_user("alice");
    harness.store.add_user("bob");

    let report = harness.run(test_config()).await;

    assert_eq!(report.statistics.groups_created, 1);
    assert_eq!(harness.store.group_count(), 1);
    assert_eq!(harness.store.group("G1").unwrap().name, "Alpha");
}

#[tokio::test]
async fn test_foreign_groups_are_never_touched() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "alice")]);
    harness.store.add_user("alice");
    let foreign = harness.store.add_foreign_group("G1", "Manual cohort");

    harness.run(test_config()).await;

    let state = harness.store.state.lock().unwrap();
    assert_eq!(state.groups[&foreign.id].name, "Manual cohort");
    assert_eq!(state.groups.len(), 2);
}

// =============================================================================
// Membership reconciliation
// =============================================================================

#[tokio::test]
async fn test_stale_members_are_removed_with_events() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "u1")]);
    let u1 = harness.store.add_user("u1");
    let u2 = harness.store.add_user("u2");
    let u3 = harness.store.add_user("u3");
    let group = harness.store.add_group("G1", "Alpha");
    for user in [u1, u2, u3] {
        harness.store.add_member(group.id, user);
    }
    let mut config = test_config();
    config.policy.max_removals = 10;

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.statistics.members_removed, 2);
    assert_eq!(harness.store.member_names(group.id), vec!["u1"]);
    assert!(harness
        .trace
        .contains(&format!("Bulk delete of 2 users from cohortid {}", group.id)));

    let removed: Vec<_> = harness
        .publisher
        .envelopes()
        .into_iter()
        .filter(|e| e.event_type == CohortMemberRemoved::EVENT_TYPE)
        .map(|e| serde_json::from_value::<CohortMemberRemoved>(e.payload).unwrap())
        .collect();
    assert_eq!(removed.len(), 2);
    let mut removed_users: Vec<_> = removed.iter().map(|e| e.user_id).collect();
    removed_users.sort();
    let mut expected = vec![u2, u3];
    expected.sort();
    assert_eq!(removed_users, expected);
    assert!(removed.iter().all(|e| e.cohort.idnumber == "G1"));
    assert!(removed.iter().all(|e| e.cohort_id == group.id));
}

#[tokio::test]
async fn test_membership_matches_resolved_external_set() {
    let harness = Harness::new(vec![
        ext_row("G1", "Alpha", "b"),
        ext_row("G1", "Alpha", "c"),
        ext_row("G1", "Alpha", "ghost"),
    ]);
    let a = harness.store.add_user("a");
    let b = harness.store.add_user("b");
    harness.store.add_user("c");
    let group = harness.store.add_group("G1", "Alpha");
    harness.store.add_member(group.id, a);
    harness.store.add_member(group.id, b);

    let report = harness.run(test_config()).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(harness.store.member_names(group.id), vec!["b", "c"]);
    assert_eq!(report.statistics.members_added, 1);
    assert_eq!(report.statistics.members_removed, 1);
    assert_eq!(report.statistics.unresolved_users, 1);
    assert!(harness.trace.contains("Could not find user with username = ghost"));
    assert!(harness.trace.contains("Bulk insert of 1 new members"));
    assert!(harness
        .publisher
        .event_types()
        .contains(&CohortMemberAdded::EVENT_TYPE.to_string()));
}

#[tokio::test]
async fn test_member_keys_match_case_insensitively() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "ALICE")]);
    let alice = harness.store.add_user("alice");
    let group = harness.store.add_group("G1", "Alpha");
    harness.store.add_member(group.id, alice);

    let report = harness.run(test_config()).await;

    assert_eq!(report.statistics.membership_changes(), 0);
    assert_eq!(harness.store.member_names(group.id), vec!["alice"]);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let harness = Harness::new(vec![
        ext_row("G1", "Alpha", "alice"),
        ext_row("G1", "Alpha", "bob"),
        ext_row("G2", "Beta", "bob"),
    ]);
    harness.store.add_user("alice");
    harness.store.add_user("bob");

    let first = harness.run(test_config()).await;
    assert!(first.statistics.has_mutations());
    let events_after_first = harness.publisher.envelopes().len();
    assert_eq!(events_after_first, 3);

    let second = harness.run(test_config()).await;

    assert_eq!(second.exit_code, 0);
    assert_eq!(second.statistics.groups_updated, 0);
    assert_eq!(second.statistics.groups_created, 0);
    assert_eq!(second.statistics.membership_changes(), 0);
    assert!(!second.statistics.has_mutations());
    assert_eq!(harness.publisher.envelopes().len(), events_after_first);
}

#[tokio::test]
async fn test_additions_are_batched() {
    let rows: Vec<FieldMap> = (1..=5)
        .map(|i| ext_row("G1", "Alpha", &format!("user{i}")))
        .collect();
    let harness = Harness::new(rows);
    for i in 1..=5 {
        harness.store.add_user(&format!("user{i}"));
    }
    let mut config = test_config();
    config.batch_size = 2;

    let report = harness.run(config).await;

    assert_eq!(report.statistics.members_added, 5);
    assert_eq!(harness.store.state.lock().unwrap().membership_inserts, 3);
    assert_eq!(report.statistics.events_published, 5);
}

#[tokio::test]
async fn test_removals_are_batched() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "keeper")]);
    let keeper = harness.store.add_user("keeper");
    let group = harness.store.add_group("G1", "Alpha");
    harness.store.add_member(group.id, keeper);
    for i in 0..5 {
        let user = harness.store.add_user(&format!("stale{i}"));
        harness.store.add_member(group.id, user);
    }
    let mut config = test_config();
    config.batch_size = 2;

    let report = harness.run(config).await;

    assert_eq!(report.statistics.members_removed, 5);
    assert_eq!(harness.store.state.lock().unwrap().delete_batches, vec![2, 2, 1]);
}

#[tokio::test]
async fn test_keep_action_never_removes() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "u1")]);
    let u1 = harness.store.add_user("u1");
    let u2 = harness.store.add_user("u2");
    let group = harness.store.add_group("G1", "Alpha");
    harness.store.add_member(group.id, u1);
    harness.store.add_member(group.id, u2);
    let mut config = test_config();
    config.policy.remove_action = RemoveAction::Keep;

    let report = harness.run(config).await;

    assert_eq!(report.statistics.members_removed, 0);
    assert_eq!(harness.store.member_names(group.id), vec!["u1", "u2"]);
}

#[tokio::test]
async fn test_invalid_member_rows_are_skipped() {
    let harness = Harness::new(vec![
        ext_row("G1", "Alpha", "alice"),
        ext_row("G1", "Alpha", "  "),
    ]);
    harness.store.add_user("alice");

    let report = harness.run(test_config()).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.statistics.invalid_member_rows, 1);
    assert!(harness
        .trace
        .contains("error: invalid external cohort record, user fields is mandatory:"));
}

// =============================================================================
// Empty external result
// =============================================================================

fn empty_cohort_harness() -> (Harness, Group) {
    let harness = Harness::new(vec![ext_row("G2", "Beta", "carol")]);
    harness.store.add_user("carol");
    let u1 = harness.store.add_user("u1");
    let u2 = harness.store.add_user("u2");
    let group = harness.store.add_group("G1", "Alpha");
    harness.store.add_member(group.id, u1);
    harness.store.add_member(group.id, u2);
    (harness, group)
}

#[tokio::test]
async fn test_empty_external_result_is_left_alone_by_default() {
    let (harness, group) = empty_cohort_harness();

    let report = harness.run(test_config()).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(harness.store.member_names(group.id), vec!["u1", "u2"]);
}

#[tokio::test]
async fn test_empty_external_result_removed_when_always() {
    let (harness, group) = empty_cohort_harness();
    let mut config = test_config();
    config.policy.empty_cohort_removal = EmptyCohortRemoval::Always;

    let report = harness.run(config).await;

    assert_eq!(report.statistics.members_removed, 2);
    assert!(harness.store.member_names(group.id).is_empty());
    // now empty and unreferenced, so swept
    assert!(harness.store.group("G1").is_none());
    assert_eq!(report.statistics.groups_cleaned_up, 1);
}

#[tokio::test]
async fn test_empty_external_result_respects_consumers() {
    let (harness, group) = empty_cohort_harness();
    harness.store.add_consumer(group.id);
    let mut config = test_config();
    config.policy.empty_cohort_removal = EmptyCohortRemoval::IfNotReferenced;

    harness.run(config).await;

    assert_eq!(harness.store.member_names(group.id), vec!["u1", "u2"]);
}

#[tokio::test]
async fn test_empty_external_result_removed_when_unreferenced() {
    let (harness, group) = empty_cohort_harness();
    let mut config = test_config();
    config.policy.empty_cohort_removal = EmptyCohortRemoval::IfNotReferenced;

    let report = harness.run(config).await;

    assert_eq!(report.statistics.members_removed, 2);
    assert!(harness.store.member_names(group.id).is_empty());
}

#[tokio::test]
async fn test_unreadable_group_aborts_with_read_failure() {
    let harness = Harness::new(vec![
        ext_row("G1", "Alpha", "alice"),
        ext_row("G2", "Beta", "bob"),
    ]);
    harness.store.add_user("alice");
    harness.store.add_user("bob");
    let gone = harness.store.add_user("gone");
    let stale = harness.store.add_user("stale");
    let g1 = harness.store.add_group("G1", "Alpha");
    let g2 = harness.store.add_group("G2", "Beta");
    let leftover = harness.store.add_group("G9", "Leftover");
    harness.store.add_member(g1.id, gone);
    harness.store.add_member(g2.id, stale);
    harness.source.state.lock().unwrap().fail_cohort = Some("G2".to_string());
    let mut config = test_config();
    config.policy.empty_cohort_removal = EmptyCohortRemoval::Always;
    notify_admins(&mut config, &harness);

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 4);
    assert_eq!(report.final_state, SyncState::Failed(4));
    assert_eq!(report.error_code.as_deref(), Some("READ_FAILURE"));
    assert_eq!(harness.notifier.sent().len(), 1);

    // G1 was reconciled before the failure and its removal stays committed.
    assert!(harness.store.member_names(g1.id).is_empty());
    assert_eq!(report.statistics.members_removed, 1);
    assert_eq!(report.statistics.events_published, 1);

    // Nothing after the failure runs: no G2 removals, no additions, no cleanup.
    assert_eq!(harness.store.member_names(g2.id), vec!["stale"]);
    assert_eq!(report.statistics.members_added, 0);
    assert!(harness.store.group("G9").is_some_and(|g| g.id == leftover.id));
}

// =============================================================================
// Removal cap
// =============================================================================

#[tokio::test]
async fn test_removal_cap_aborts_before_offending_group() {
    let harness = Harness::new(vec![
        ext_row("G1", "Alpha", "keeper"),
        ext_row("G2", "Beta", "keeper"),
    ]);
    let keeper = harness.store.add_user("keeper");
    let g1 = harness.store.add_group("G1", "Alpha");
    let g2 = harness.store.add_group("G2", "Beta");
    harness.store.add_member(g1.id, keeper);
    harness.store.add_member(g2.id, keeper);
    for name in ["a1", "a2"] {
        let user = harness.store.add_user(name);
        harness.store.add_member(g1.id, user);
    }
    for name in ["b1", "b2"] {
        let user = harness.store.add_user(name);
        harness.store.add_member(g2.id, user);
    }
    let mut config = test_config();
    config.policy.max_removals = 3;
    notify_admins(&mut config, &harness);

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.final_state, SyncState::Failed(1));
    assert_eq!(report.error_code.as_deref(), Some("REMOVAL_CAP_EXCEEDED"));
    assert_eq!(report.statistics.members_removed, 2);
    assert_eq!(harness.store.member_names(g1.id), vec!["keeper"]);
    assert_eq!(harness.store.member_names(g2.id), vec!["b1", "b2", "keeper"]);

    let message = report.error.unwrap();
    assert!(message.starts_with("The cohort sync process has removed 2 members from previous cohorts, 2 more pending in cohort"));
    assert!(message.contains(&g2.id.to_string()));
    assert!(message.contains("max removal threshold of 3"));
    assert_eq!(harness.notifier.sent().len(), 1);
    // events for removals committed before the abort still go out
    assert_eq!(report.statistics.events_published, 2);
}

#[tokio::test]
async fn test_zero_cap_is_unbounded() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "keeper")]);
    let keeper = harness.store.add_user("keeper");
    let group = harness.store.add_group("G1", "Alpha");
    harness.store.add_member(group.id, keeper);
    for i in 0..20 {
        let user = harness.store.add_user(&format!("stale{i}"));
        harness.store.add_member(group.id, user);
    }
    let mut config = test_config();
    config.policy.max_removals = 0;

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.statistics.members_removed, 20);
}

// =============================================================================
// Aborts
// =============================================================================

#[tokio::test]
async fn test_sanity_threshold_aborts_without_mutation() {
    let harness = Harness::new(vec![
        ext_row("G1", "Alpha", "a"),
        ext_row("G2", "Beta", "b"),
        ext_row("G3", "Gamma", "c"),
    ]);
    let mut config = test_config();
    config.policy.min_records = 10;
    notify_admins(&mut config, &harness);

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.final_state, SyncState::Failed(1));
    assert_eq!(report.statistics.external_records, 3);
    assert!(!report.statistics.has_mutations());
    assert_eq!(harness.store.group_count(), 0);
    {
        let state = harness.store.state.lock().unwrap();
        assert_eq!(state.group_inserts + state.group_updates, 0);
        assert_eq!(state.membership_inserts + state.membership_deletes, 0);
    }

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "cohort sync error");
    assert_eq!(
        sent[0].2,
        "Failed to sync because the external db returned 3 records and the minimum required is 10"
    );
    assert!(harness.trace.is_finished());
}

#[tokio::test]
async fn test_failed_count_counts_as_zero() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "a")]);
    let harness = Harness {
        source: StaticSource::new(vec![ext_row("G1", "Alpha", "a")]).failing_count(),
        ..harness
    };
    let mut config = test_config();
    config.policy.min_records = 1;

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.error_code.as_deref(), Some("SANITY_THRESHOLD_NOT_MET"));
    assert_eq!(harness.store.group_count(), 0);
}

#[tokio::test]
async fn test_incomplete_config_aborts_without_notification() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "a")]);
    let mut config = test_config();
    config.mapping.remote_table = String::new();
    config.mapping.remote_cohort_name_field = "".into();
    notify_admins(&mut config, &harness);

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.final_state, SyncState::Failed(1));
    assert!(harness.trace.contains("External cohort config not complete."));
    assert!(harness.trace.contains("COHORTSYNC_REMOTE_TABLE"));
    assert!(harness.trace.contains("COHORTSYNC_REMOTE_COHORT_NAME_FIELD"));
    assert!(harness.notifier.sent().is_empty());
    assert!(harness.source.queries().is_empty());
}

#[tokio::test]
async fn test_unreachable_source_aborts_and_notifies() {
    let harness = Harness::new(vec![]);
    let harness = Harness {
        source: StaticSource::new(vec![]).unreachable(),
        ..harness
    };
    let mut config = test_config();
    notify_admins(&mut config, &harness);

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.error_code.as_deref(), Some("CONNECTION_FAILURE"));
    assert!(harness
        .trace
        .contains("Error while communicating with external cohort database"));
    assert_eq!(harness.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_read_failure_exits_with_four() {
    let harness = Harness::new(vec![]);
    let harness = Harness {
        source: StaticSource::new(vec![ext_row("G1", "Alpha", "a")]).failing_queries(),
        ..harness
    };
    let mut config = test_config();
    notify_admins(&mut config, &harness);

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 4);
    assert_eq!(report.final_state, SyncState::Failed(4));
    assert!(report
        .error
        .unwrap()
        .starts_with("Cohort sync failed: Error reading data from the external cohort table"));
    assert_eq!(harness.notifier.sent().len(), 1);
    assert_eq!(harness.store.group_count(), 0);
}

#[tokio::test]
async fn test_store_failure_aborts_and_skips_cleanup() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "alice")]);
    harness.store.add_user("alice");
    let empty = harness.store.add_group("G9", "Leftover");
    harness.store.fail_on(FailOn::InsertMemberships);
    let mut config = test_config();
    notify_admins(&mut config, &harness);

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.error_code.as_deref(), Some("STORE_FAILURE"));
    assert_eq!(harness.notifier.sent().len(), 1);
    assert!(harness.store.group("G9").is_some_and(|g| g.id == empty.id));
}

#[tokio::test]
async fn test_support_target_notifies_support_contact_only() {
    let harness = Harness::new(vec![]);
    {
        let mut state = harness.store.state.lock().unwrap();
        state.support = Some(admin("support@example.edu"));
        state.admins = vec![admin("a@example.edu"), admin("b@example.edu")];
    }
    let mut config = test_config();
    config.policy.min_records = 1;
    config.notify = NotificationTarget::Support;

    harness.run(config).await;

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "support@example.edu");
}

// =============================================================================
// Cleanup and publication
// =============================================================================

#[tokio::test]
async fn test_cleanup_removes_only_unreferenced_empty_managed_groups() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "alice")]);
    harness.store.add_user("alice");
    harness.store.add_group("OLD", "Empty");
    let consumed = harness.store.add_group("USED", "Consumed");
    harness.store.add_consumer(consumed.id);
    let foreign = harness.store.add_foreign_group("MANUAL", "Manual");

    let report = harness.run(test_config()).await;

    assert_eq!(report.final_state, SyncState::Done);
    assert_eq!(report.statistics.groups_cleaned_up, 1);
    assert!(harness.store.group("OLD").is_none());
    assert!(harness.store.group("USED").is_some());
    assert!(harness.store.group("MANUAL").is_some_and(|g| g.id == foreign.id));
    assert!(harness.store.group("G1").is_some());
}

#[tokio::test]
async fn test_publish_failure_is_not_fatal() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "alice")]);
    let harness = Harness {
        publisher: RecordingPublisher::failing(),
        ..harness
    };
    harness.store.add_user("alice");

    let report = harness.run(test_config()).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.statistics.members_added, 1);
    assert_eq!(report.statistics.events_failed, 1);
    assert_eq!(report.statistics.events_published, 0);
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "alice")]);
    harness.store.add_user("alice");

    let report = harness.run(test_config()).await;
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["final_state"], "done");
    assert_eq!(json["statistics"]["groups_created"], 1);
    assert!(json.get("error").is_none());
}

// =============================================================================
// User provisioning
// =============================================================================

fn profile_row(cohort: &str, username: &str, email: &str) -> FieldMap {
    FieldMap::from_pairs([
        ("cohortid", cohort),
        ("cohortname", "Alpha"),
        ("username", username),
        ("email", email),
        ("firstname", "New"),
        ("lastname", "Student"),
    ])
}

fn provisioning_config() -> SyncConfig {
    let mut config = test_config();
    config.provisioning.enabled = true;
    config.provisioning.username_field = "username".into();
    config.provisioning.email_field = "email".into();
    config.provisioning.first_name_field = "firstname".into();
    config.provisioning.last_name_field = "lastname".into();
    config
}

#[tokio::test]
async fn test_missing_users_are_provisioned_and_joined_next_pass() {
    let harness = Harness::new(vec![
        profile_row("G1", "alice", "alice@example.edu"),
        profile_row("G1", "Newbie", "newbie@example.edu"),
    ]);
    harness.store.add_user("alice");

    let first = harness.run(provisioning_config()).await;

    assert_eq!(first.exit_code, 0);
    assert_eq!(first.statistics.users_created, 1);
    assert!(harness.trace.contains("Created 1 new users"));
    let created = harness.store.user_id("newbie").unwrap();
    let group = harness.store.group("G1").unwrap();
    assert_eq!(harness.store.member_names(group.id), vec!["alice"]);
    {
        let state = harness.store.state.lock().unwrap();
        let user = state.users.iter().find(|u| u.id == created).unwrap();
        assert_eq!(user.email, "newbie@example.edu");
        assert_eq!(user.auth, "manual");
    }

    let second = harness.run(provisioning_config()).await;

    assert_eq!(second.statistics.users_created, 0);
    assert_eq!(second.statistics.members_added, 1);
    assert_eq!(harness.store.member_names(group.id), vec!["alice", "newbie"]);
}

#[tokio::test]
async fn test_missing_user_in_two_groups_is_provisioned_once() {
    let harness = Harness::new(vec![
        profile_row("G1", "newbie", "newbie@example.edu"),
        profile_row("G2", "newbie", "newbie@example.edu"),
        profile_row("G2", "alice", "alice@example.edu"),
    ]);
    harness.store.add_user("alice");
    let mut config = provisioning_config();
    config.batch_size = 1;

    let report = harness.run(config).await;

    assert_eq!(report.statistics.users_created, 1);
    let count = harness
        .store
        .state
        .lock()
        .unwrap()
        .users
        .iter()
        .filter(|u| u.username == "newbie")
        .count();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_provisioning_failure_is_not_fatal() {
    let harness = Harness::new(vec![
        profile_row("G1", "alice", "alice@example.edu"),
        profile_row("G1", "newbie", "newbie@example.edu"),
    ]);
    harness.store.add_user("alice");
    harness.store.fail_on(FailOn::CreateUser);

    let report = harness.run(provisioning_config()).await;

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.statistics.users_created, 0);
    assert!(harness.trace.contains("error: could not create user newbie"));
    assert!(harness.trace.contains("Created 0 new users"));
}

#[tokio::test]
async fn test_provisioning_requires_profile_columns() {
    let harness = Harness::new(vec![]);
    let mut config = provisioning_config();
    config.provisioning.email_field = "".into();

    let report = harness.run(config).await;

    assert_eq!(report.exit_code, 1);
    assert!(report
        .error
        .unwrap()
        .contains("COHORTSYNC_CREATE_USERS_EMAIL"));
}

// =============================================================================
// Trace
// =============================================================================

#[tokio::test]
async fn test_trace_follows_phases() {
    let harness = Harness::new(vec![ext_row("G1", "Alpha", "alice")]);
    harness.store.add_user("alice");

    harness.run(test_config()).await;

    let lines = harness.trace.lines();
    let position = |needle: &str| lines.iter().position(|l| l.contains(needle)).unwrap();
    assert_eq!(lines[0], "Starting cohort synchronisation...");
    assert!(position("Bulk insert of 1 new cohorts") < position("Starting cohort database user sync"));
    assert!(position("Starting cohort database user sync") < position("Bulk insert of 1 new members"));
    assert!(harness.trace.is_finished());
}
