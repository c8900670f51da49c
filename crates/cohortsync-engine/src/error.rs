//! Error types for the sync engine.

use thiserror::Error;
use uuid::Uuid;

use cohortsync_connector::ConnectorError;

/// Failure reported by a [`LocalStore`](crate::store::LocalStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database failed.
    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A record the operation depends on does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness rule would be violated.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// A stored value could not be interpreted.
    #[error("invalid data: {message}")]
    InvalidData { message: String },
}

impl StoreError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        StoreError::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error with source.
    pub fn database_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StoreError::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Abort-level failure of a sync pass.
///
/// Non-fatal problems (invalid rows, unresolved users, failed event
/// publication) never surface here; they go to the progress trace.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Required mapping settings are empty.
    #[error("External cohort config not complete. Missing: {}", missing.join(", "))]
    ConfigIncomplete { missing: Vec<String> },

    /// The external source could not be reached.
    #[error("Error while communicating with external cohort database: {source}")]
    ConnectionFailure {
        #[source]
        source: ConnectorError,
    },

    /// The external table holds fewer rows than the configured minimum.
    #[error("Failed to sync because the external db returned {count} records and the minimum required is {minimum}")]
    SanityThresholdNotMet { count: u64, minimum: u64 },

    /// Reading the external cohort list or a cohort's members failed.
    #[error("Cohort sync failed: Error reading data from the external cohort table: {source}")]
    ReadFailure {
        #[source]
        source: ConnectorError,
    },

    /// Removing this group's stale members would exceed the removal cap.
    #[error("The cohort sync process has removed {already_removed} members from previous cohorts, {pending} more pending in cohort {group_id}, this exceeds the max removal threshold of {max_removals} so the process was stopped.")]
    RemovalCapExceeded {
        already_removed: u64,
        pending: u64,
        max_removals: u64,
        group_id: Uuid,
    },

    /// The local store failed mid-pass.
    #[error("Cohort sync failed: local store error: {source}")]
    Store {
        #[from]
        source: StoreError,
    },
}

impl SyncError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::ReadFailure { .. } => 4,
            _ => 1,
        }
    }

    /// Whether administrators are alerted about this failure.
    pub fn notifies(&self) -> bool {
        !matches!(self, SyncError::ConfigIncomplete { .. })
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::ConfigIncomplete { .. } => "CONFIG_INCOMPLETE",
            SyncError::ConnectionFailure { .. } => "CONNECTION_FAILURE",
            SyncError::SanityThresholdNotMet { .. } => "SANITY_THRESHOLD_NOT_MET",
            SyncError::ReadFailure { .. } => "READ_FAILURE",
            SyncError::RemovalCapExceeded { .. } => "REMOVAL_CAP_EXCEEDED",
            SyncError::Store { .. } => "STORE_FAILURE",
        }
    }
}

/// Result type for a sync pass.
pub type SyncResult<T> = Result<T, SyncError>;
