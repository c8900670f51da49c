//! CLI error types and exit codes

use thiserror::Error;

use cohortsync_connector::{ConfigError, ConnectorError};
use cohortsync_db::DbError;

/// Failures before a sync pass starts. All exit with code 1; failures
/// inside a pass are reported through the sync report instead.
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External source error: {0}")]
    Source(String),

    #[error("Local store error: {0}")]
    Store(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        1
    }

    pub fn print(&self) {
        eprintln!("Error: {self}");
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<ConnectorError> for CliError {
    fn from(e: ConnectorError) -> Self {
        CliError::Source(e.to_string())
    }
}

impl From<DbError> for CliError {
    fn from(e: DbError) -> Self {
        CliError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Output(e.to_string())
    }
}
