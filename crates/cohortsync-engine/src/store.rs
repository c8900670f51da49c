//! Local store contract.
//!
//! The engine reads snapshots through this trait and delegates every durable
//! mutation to it. Bulk operations must apply in bounded chunks so that a
//! crash never leaves a chunk half-written.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::{Group, LocalUserField, Membership, NewGroup, NewUser, Recipient};

/// Keyed record store holding groups, memberships and users.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Groups owned by this system, indexed by idnumber.
    async fn managed_groups(&self) -> StoreResult<BTreeMap<String, Group>>;

    /// Persist name, description and modification time of a group.
    async fn update_group(&self, group: &Group) -> StoreResult<()>;

    /// Insert groups in bulk and return them with their assigned ids.
    async fn insert_groups(&self, groups: &[NewGroup]) -> StoreResult<Vec<Group>>;

    /// Current members of a group, keyed by the value of `field`.
    ///
    /// Members whose `field` is empty are left out.
    async fn group_member_keys(
        &self,
        group_id: Uuid,
        field: LocalUserField,
    ) -> StoreResult<HashMap<String, Uuid>>;

    /// Delete the given members of a group.
    ///
    /// Returns the users whose membership was actually deleted.
    async fn delete_memberships(&self, group_id: Uuid, user_ids: &[Uuid])
        -> StoreResult<Vec<Uuid>>;

    /// Insert memberships in bulk, skipping pairs that already exist.
    ///
    /// Returns the rows actually inserted.
    async fn insert_memberships(&self, memberships: &[Membership])
        -> StoreResult<Vec<Membership>>;

    /// Case-insensitive lookup of a user by one attribute.
    async fn find_user_id(&self, field: LocalUserField, value: &str) -> StoreResult<Option<Uuid>>;

    /// Create a user account and return its id.
    async fn create_user(&self, user: &NewUser) -> StoreResult<Uuid>;

    /// Whether an enrolment integration consumes the group.
    async fn group_is_referenced(&self, group_id: Uuid) -> StoreResult<bool>;

    /// Delete managed groups with no members and no consumer.
    async fn delete_unreferenced_empty_groups(&self) -> StoreResult<u64>;

    /// The support contact, if one is configured.
    async fn support_contact(&self) -> StoreResult<Option<Recipient>>;

    /// Every site administrator.
    async fn site_administrators(&self) -> StoreResult<Vec<Recipient>>;
}
