//! Subcommands

pub mod probe;
pub mod sync;

use cohortsync_connector::ConnectorConfig;
use cohortsync_connector_database::{DatabaseConfig, DatabaseConnector};

use crate::error::CliResult;

/// Build the external source from `COHORTSYNC_DB_*` variables.
pub(crate) fn external_source() -> CliResult<DatabaseConnector> {
    let config = DatabaseConfig::from_env()?;
    tracing::debug!(config = ?config.redacted(), "Loaded external database settings");
    Ok(DatabaseConnector::new(config)?)
}
