//! Sync command - Run one reconciliation pass

use std::sync::Arc;

use clap::Args;
use tracing::{info, warn};

use cohortsync_connector::config::optional_var;
use cohortsync_connector::Connector;
use cohortsync_db::{connect, run_migrations, PgLocalStore, PoolSettings};
use cohortsync_engine::prelude::*;

use crate::error::{CliError, CliResult};

/// Arguments for the sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Print progress lines to stdout
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run a pass and return its exit code.
pub async fn execute(args: SyncArgs) -> CliResult<i32> {
    let config = SyncConfig::from_env()?;
    let env = |key: &str| std::env::var(key);
    let database_url = optional_var(&env, "DATABASE_URL")
        .ok_or_else(|| CliError::Config("DATABASE_URL is not set".to_string()))?;

    let pool = connect(&database_url, PoolSettings::default()).await?;
    run_migrations(&pool).await?;
    let store = PgLocalStore::new(pool).with_batch_size(config.batch_size);

    let source = Arc::new(super::external_source()?);
    info!(source = %source.display_name(), "Starting sync");

    let engine = SyncEngine::new(
        config,
        source.clone(),
        Arc::new(store),
        Arc::new(TracingPublisher),
        Arc::new(LogNotifier),
    );
    let report = if args.verbose {
        engine.run(&TextTrace).await
    } else {
        engine.run(&NullTrace).await
    };

    if let Err(e) = source.dispose().await {
        warn!(error = %e, "Failed to close external source");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report.exit_code)
}
