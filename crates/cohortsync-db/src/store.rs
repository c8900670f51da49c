//! PostgreSQL implementation of [`LocalStore`].
//!
//! Bulk writes are split into chunks of `batch_size` rows. Each chunk runs in
//! its own transaction and is expanded server-side with `UNNEST`, so a failure
//! rolls back at most one chunk.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use cohortsync_engine::model::COMPONENT;
use cohortsync_engine::{
    Group, LocalStore, LocalUserField, Membership, NewGroup, NewUser, Recipient, StoreError,
    StoreResult,
};

use crate::error::DbError;
use crate::models::{key_expression, CohortMemberRow, CohortRow, RecipientRow, COHORT_COLUMNS};

const DEFAULT_BATCH_SIZE: usize = 500;

const UPDATE_GROUP_SQL: &str = r"
    UPDATE cohorts
    SET name = $2, description = $3, modified_at = $4
    WHERE id = $1
";

const DELETE_MEMBERS_SQL: &str = r"
    DELETE FROM cohort_members
    WHERE cohort_id = $1 AND user_id = ANY($2)
    RETURNING user_id
";

const INSERT_MEMBERS_SQL: &str = r"
    INSERT INTO cohort_members (cohort_id, user_id, added_at)
    SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::timestamptz[])
    ON CONFLICT (cohort_id, user_id) DO NOTHING
    RETURNING cohort_id, user_id, added_at
";

const CREATE_USER_SQL: &str = r"
    INSERT INTO users (username, email, first_name, last_name, idnumber, auth)
    VALUES ($1, $2, $3, $4, $5, $6)
    RETURNING id
";

const GROUP_REFERENCED_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM cohort_consumers WHERE cohort_id = $1)";

const DELETE_EMPTY_GROUPS_SQL: &str = r"
    DELETE FROM cohorts c
    WHERE c.component = $1
      AND NOT EXISTS (SELECT 1 FROM cohort_members m WHERE m.cohort_id = c.id)
      AND NOT EXISTS (SELECT 1 FROM cohort_consumers k WHERE k.cohort_id = c.id)
";

const SUPPORT_CONTACT_SQL: &str = r"
    SELECT id, email, first_name, last_name FROM users
    WHERE is_support_contact AND NOT deleted
    ORDER BY created_at
    LIMIT 1
";

const SITE_ADMINS_SQL: &str = r"
    SELECT id, email, first_name, last_name FROM users
    WHERE is_site_admin AND NOT deleted
    ORDER BY created_at
";

fn managed_groups_sql() -> String {
    format!("SELECT {COHORT_COLUMNS} FROM cohorts WHERE component = $1")
}

fn insert_groups_sql() -> String {
    format!(
        "INSERT INTO cohorts (idnumber, name, description, component, context_id, visible, created_at, modified_at) \
         SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::bigint[], $6::bool[], $7::timestamptz[], $8::timestamptz[]) \
         RETURNING {COHORT_COLUMNS}"
    )
}

fn member_keys_sql(field: LocalUserField) -> String {
    let key = key_expression(field);
    format!(
        "SELECT {key} AS key, u.id AS user_id \
         FROM cohort_members m JOIN users u ON u.id = m.user_id \
         WHERE m.cohort_id = $1 AND {key} <> ''"
    )
}

fn find_user_sql(field: LocalUserField) -> String {
    match field {
        LocalUserField::Id => "SELECT id FROM users WHERE id = $1 AND NOT deleted".to_string(),
        other => format!(
            "SELECT id FROM users WHERE LOWER({column}) = LOWER($1) AND NOT deleted \
             ORDER BY created_at LIMIT 1",
            column = other.as_str()
        ),
    }
}

fn db(e: sqlx::Error) -> StoreError {
    DbError::from(e).into()
}

/// Local store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgLocalStore {
    pool: PgPool,
    batch_size: usize,
}

impl PgLocalStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Rows per bulk chunk; zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_group_chunk(&self, chunk: &[NewGroup]) -> StoreResult<Vec<Group>> {
        let sql = insert_groups_sql();
        let mut tx = self.pool.begin().await.map_err(db)?;
        let rows: Vec<CohortRow> = sqlx::query_as(&sql)
            .bind(chunk.iter().map(|g| g.idnumber.clone()).collect::<Vec<_>>())
            .bind(chunk.iter().map(|g| g.name.clone()).collect::<Vec<_>>())
            .bind(chunk.iter().map(|g| g.description.clone()).collect::<Vec<_>>())
            .bind(chunk.iter().map(|g| g.component.clone()).collect::<Vec<_>>())
            .bind(chunk.iter().map(|g| g.context_id).collect::<Vec<_>>())
            .bind(chunk.iter().map(|g| g.visible).collect::<Vec<_>>())
            .bind(chunk.iter().map(|g| g.created_at).collect::<Vec<_>>())
            .bind(chunk.iter().map(|g| g.modified_at).collect::<Vec<_>>())
            .fetch_all(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(rows.into_iter().map(Group::from).collect())
    }
}

#[async_trait]
impl LocalStore for PgLocalStore {
    #[instrument(skip(self))]
    async fn managed_groups(&self) -> StoreResult<BTreeMap<String, Group>> {
        let rows: Vec<CohortRow> = sqlx::query_as(&managed_groups_sql())
            .bind(COMPONENT)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.idnumber.clone(), Group::from(row)))
            .collect())
    }

    #[instrument(skip(self, group), fields(group_id = %group.id))]
    async fn update_group(&self, group: &Group) -> StoreResult<()> {
        let result = sqlx::query(UPDATE_GROUP_SQL)
            .bind(group.id)
            .bind(&group.name)
            .bind(&group.description)
            .bind(group.modified_at)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "cohort",
                id: group.id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, groups), fields(count = groups.len()))]
    async fn insert_groups(&self, groups: &[NewGroup]) -> StoreResult<Vec<Group>> {
        let mut created = Vec::with_capacity(groups.len());
        for chunk in groups.chunks(self.batch_size) {
            created.extend(self.insert_group_chunk(chunk).await?);
        }
        debug!(created = created.len(), "Inserted cohorts");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn group_member_keys(
        &self,
        group_id: Uuid,
        field: LocalUserField,
    ) -> StoreResult<HashMap<String, Uuid>> {
        let rows: Vec<(String, Uuid)> = sqlx::query_as(&member_keys_sql(field))
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        Ok(rows.into_iter().collect())
    }

    #[instrument(skip(self, user_ids), fields(count = user_ids.len()))]
    async fn delete_memberships(
        &self,
        group_id: Uuid,
        user_ids: &[Uuid],
    ) -> StoreResult<Vec<Uuid>> {
        let mut deleted = Vec::with_capacity(user_ids.len());
        for chunk in user_ids.chunks(self.batch_size) {
            let mut tx = self.pool.begin().await.map_err(db)?;
            let rows: Vec<(Uuid,)> = sqlx::query_as(DELETE_MEMBERS_SQL)
                .bind(group_id)
                .bind(chunk.to_vec())
                .fetch_all(&mut *tx)
                .await
                .map_err(db)?;
            tx.commit().await.map_err(db)?;
            deleted.extend(rows.into_iter().map(|(user_id,)| user_id));
        }
        Ok(deleted)
    }

    #[instrument(skip(self, memberships), fields(count = memberships.len()))]
    async fn insert_memberships(&self, memberships: &[Membership]) -> StoreResult<Vec<Membership>> {
        let mut inserted = Vec::with_capacity(memberships.len());
        for chunk in memberships.chunks(self.batch_size) {
            let mut tx = self.pool.begin().await.map_err(db)?;
            let rows: Vec<CohortMemberRow> = sqlx::query_as(INSERT_MEMBERS_SQL)
                .bind(chunk.iter().map(|m| m.group_id).collect::<Vec<_>>())
                .bind(chunk.iter().map(|m| m.user_id).collect::<Vec<_>>())
                .bind(chunk.iter().map(|m| m.added_at).collect::<Vec<_>>())
                .fetch_all(&mut *tx)
                .await
                .map_err(db)?;
            tx.commit().await.map_err(db)?;
            inserted.extend(rows.into_iter().map(Membership::from));
        }
        Ok(inserted)
    }

    async fn find_user_id(&self, field: LocalUserField, value: &str) -> StoreResult<Option<Uuid>> {
        let sql = find_user_sql(field);
        let query = sqlx::query_scalar::<_, Uuid>(&sql);
        let query = match field {
            LocalUserField::Id => match Uuid::parse_str(value.trim()) {
                Ok(id) => query.bind(id),
                Err(_) => return Ok(None),
            },
            _ => query.bind(value),
        };
        query.fetch_optional(&self.pool).await.map_err(db)
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    async fn create_user(&self, user: &NewUser) -> StoreResult<Uuid> {
        sqlx::query_scalar(CREATE_USER_SQL)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.idnumber.as_deref().unwrap_or_default())
            .bind(&user.auth)
            .fetch_one(&self.pool)
            .await
            .map_err(db)
    }

    async fn group_is_referenced(&self, group_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar(GROUP_REFERENCED_SQL)
            .bind(group_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db)
    }

    #[instrument(skip(self))]
    async fn delete_unreferenced_empty_groups(&self) -> StoreResult<u64> {
        let result = sqlx::query(DELETE_EMPTY_GROUPS_SQL)
            .bind(COMPONENT)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn support_contact(&self) -> StoreResult<Option<Recipient>> {
        let row: Option<RecipientRow> = sqlx::query_as(SUPPORT_CONTACT_SQL)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.map(Recipient::from))
    }

    async fn site_administrators(&self) -> StoreResult<Vec<Recipient>> {
        let rows: Vec<RecipientRow> = sqlx::query_as(SITE_ADMINS_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        Ok(rows.into_iter().map(Recipient::from).collect())
    }
}
