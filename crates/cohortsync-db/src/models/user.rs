//! User lookups.

use sqlx::FromRow;
use uuid::Uuid;

use cohortsync_engine::{LocalUserField, Recipient};

/// Expression selecting `field` from `users u` as text.
///
/// The column comes from a closed enum, so it is safe to splice into SQL.
pub fn key_expression(field: LocalUserField) -> &'static str {
    match field {
        LocalUserField::Id => "u.id::text",
        LocalUserField::IdNumber => "u.idnumber",
        LocalUserField::Email => "u.email",
        LocalUserField::Username => "u.username",
    }
}

/// Alert recipient row.
#[derive(Debug, Clone, FromRow)]
pub struct RecipientRow {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<RecipientRow> for Recipient {
    fn from(row: RecipientRow) -> Self {
        let display_name = format!("{} {}", row.first_name, row.last_name)
            .trim()
            .to_string();
        Recipient {
            user_id: Some(row.id),
            email: row.email,
            display_name,
        }
    }
}
