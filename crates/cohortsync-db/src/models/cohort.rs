//! Cohort and membership rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use cohortsync_engine::{Group, Membership};

/// Column list shared by every cohort `SELECT`/`RETURNING`.
pub const COHORT_COLUMNS: &str =
    "id, idnumber, name, description, component, context_id, visible, created_at, modified_at";

/// A row of `cohorts`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CohortRow {
    pub id: Uuid,
    pub idnumber: String,
    pub name: String,
    pub description: Option<String>,
    pub component: String,
    pub context_id: i64,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl From<CohortRow> for Group {
    fn from(row: CohortRow) -> Self {
        Group {
            id: row.id,
            idnumber: row.idnumber,
            name: row.name,
            description: row.description,
            component: row.component,
            context_id: row.context_id,
            visible: row.visible,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

/// A row of `cohort_members`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CohortMemberRow {
    pub cohort_id: Uuid,
    pub user_id: Uuid,
    pub added_at: DateTime<Utc>,
}

impl From<CohortMemberRow> for Membership {
    fn from(row: CohortMemberRow) -> Self {
        Membership {
            group_id: row.cohort_id,
            user_id: row.user_id,
            added_at: row.added_at,
        }
    }
}
