//! Local domain records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cohortsync_events::CohortSnapshot;

/// Owner tag stamped on every cohort this system creates.
pub const COMPONENT: &str = "cohortsync";

/// Context new cohorts are created in.
pub const SYSTEM_CONTEXT_ID: i64 = 1;

/// A cohort in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    /// External identifier; unique among managed groups.
    pub idnumber: String,
    pub name: String,
    pub description: Option<String>,
    pub component: String,
    pub context_id: i64,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Group {
    /// Whether this system owns the group.
    pub fn is_managed(&self) -> bool {
        self.component == COMPONENT
    }

    /// Point-in-time copy attached to removal events.
    pub fn snapshot(&self) -> CohortSnapshot {
        CohortSnapshot {
            id: self.id,
            idnumber: self.idnumber.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            component: self.component.clone(),
            context_id: self.context_id,
            visible: self.visible,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// A group staged for bulk insertion. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub idnumber: String,
    pub name: String,
    pub description: Option<String>,
    pub component: String,
    pub context_id: i64,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl NewGroup {
    /// A visible, system-owned group in the system context.
    pub fn managed(
        idnumber: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            idnumber: idnumber.into(),
            name: name.into(),
            description,
            component: COMPONENT.to_string(),
            context_id: SYSTEM_CONTEXT_ID,
            visible: true,
            created_at: now,
            modified_at: now,
        }
    }

    /// Materialize with a store-assigned id.
    pub fn into_group(self, id: Uuid) -> Group {
        Group {
            id,
            idnumber: self.idnumber,
            name: self.name,
            description: self.description,
            component: self.component,
            context_id: self.context_id,
            visible: self.visible,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// One (group, user) membership row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub added_at: DateTime<Utc>,
}

/// Profile of a user to provision locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub idnumber: Option<String>,
    /// Authentication method the account is created with.
    pub auth: String,
}

/// Someone who receives abort notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: Option<Uuid>,
    pub email: String,
    pub display_name: String,
}

/// Local user attribute matched against the external user key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalUserField {
    Id,
    #[default]
    IdNumber,
    Email,
    Username,
}

impl LocalUserField {
    /// Column name in the local user table.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalUserField::Id => "id",
            LocalUserField::IdNumber => "idnumber",
            LocalUserField::Email => "email",
            LocalUserField::Username => "username",
        }
    }
}

impl fmt::Display for LocalUserField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocalUserField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "id" => Ok(LocalUserField::Id),
            "idnumber" => Ok(LocalUserField::IdNumber),
            "email" => Ok(LocalUserField::Email),
            "username" => Ok(LocalUserField::Username),
            other => Err(format!(
                "expected one of id, idnumber, email, username; got '{other}'"
            )),
        }
    }
}
