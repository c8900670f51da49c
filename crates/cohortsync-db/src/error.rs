//! Error types for the cohortsync-db crate.
//!
//! Wraps `SQLx` errors with context and converts them into the engine's
//! [`StoreError`].

use thiserror::Error;

use cohortsync_engine::StoreError;

/// PostgreSQL error code for unique violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Database operation errors.
///
/// # Example
///
/// ```rust
/// use cohortsync_db::DbError;
///
/// fn handle_error(err: DbError) {
///     match err {
///         DbError::ConnectionFailed(e) => eprintln!("Cannot connect: {}", e),
///         DbError::MigrationFailed(e) => eprintln!("Migration error: {}", e),
///         DbError::QueryFailed(e) => eprintln!("Query error: {}", e),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to establish or acquire a database connection.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A database migration failed to apply.
    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// A database query failed to execute.
    #[error("Query failed: {0}")]
    QueryFailed(#[source] sqlx::Error),
}

impl DbError {
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::ConnectionFailed(_))
    }

    #[must_use]
    pub fn is_migration_error(&self) -> bool {
        matches!(self, DbError::MigrationFailed(_))
    }

    /// Whether a unique constraint rejected the statement.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::QueryFailed(sqlx::Error::Database(e)) => {
                e.code().as_deref() == Some(UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DbError::ConnectionFailed(e)
            }
            other => DbError::QueryFailed(other),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        if e.is_unique_violation() {
            return StoreError::Conflict {
                message: e.to_string(),
            };
        }
        let message = e.to_string();
        StoreError::database_with_source(message, e)
    }
}
