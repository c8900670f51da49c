//! Probe command - Check connectivity and list external columns

use clap::Args;
use tracing::warn;

use cohortsync_connector::config::optional_var;
use cohortsync_connector::Connector;
use cohortsync_engine::probe;

use crate::error::CliResult;

/// Arguments for the probe command
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ProbeArgs) -> CliResult<i32> {
    let env = |key: &str| std::env::var(key);
    let table = optional_var(&env, "COHORTSYNC_REMOTE_TABLE").unwrap_or_default();

    let source = super::external_source()?;
    let outcome = probe(&source, &table).await;
    if let Err(e) = source.dispose().await {
        warn!(error = %e, "Failed to close external source");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{outcome}");
    }
    Ok(if outcome.is_success() { 0 } else { 1 })
}
