//! Configuration check against the external table.

use std::fmt;

use serde::Serialize;
use tracing::{info, instrument, warn};

use cohortsync_connector::ExternalSource;

/// Result of probing the external table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ProbeOutcome {
    TableNotSpecified,
    CannotConnect(String),
    CannotRead(String),
    Empty,
    Columns(Vec<String>),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Columns(_))
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::TableNotSpecified => f.write_str("External cohort table not specified."),
            ProbeOutcome::CannotConnect(_) => f.write_str("Cannot connect the database."),
            ProbeOutcome::CannotRead(_) => f.write_str("Can not read external cohort table."),
            ProbeOutcome::Empty => f.write_str("External cohort table is empty."),
            ProbeOutcome::Columns(columns) => write!(
                f,
                "External cohort table contains following columns: {}",
                columns.join(", ")
            ),
        }
    }
}

/// Connect and list the columns of `table` without syncing anything.
#[instrument(skip(source))]
pub async fn probe(source: &dyn ExternalSource, table: &str) -> ProbeOutcome {
    let table = table.trim();
    if table.is_empty() {
        return ProbeOutcome::TableNotSpecified;
    }

    if let Err(e) = source.test_connection().await {
        warn!(error = %e, source = %source.display_name(), "Probe could not connect");
        return ProbeOutcome::CannotConnect(e.to_string());
    }

    let outcome = match source.list_columns(table).await {
        Ok(columns) if columns.is_empty() => ProbeOutcome::Empty,
        Ok(columns) => ProbeOutcome::Columns(columns),
        Err(e) => {
            warn!(error = %e, "Probe could not read table");
            ProbeOutcome::CannotRead(e.to_string())
        }
    };

    info!(success = outcome.is_success(), "Probe finished");
    outcome
}
