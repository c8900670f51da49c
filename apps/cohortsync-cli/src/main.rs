//! cohortsync - one-way sync of local cohorts from an external SQL table
//!
//! Configuration comes from `COHORTSYNC_*` environment variables, optionally
//! loaded from a `.env` file, plus `DATABASE_URL` for the local store. The
//! process exit status is the sync exit code.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use error::CliResult;

/// cohortsync - external cohort synchronisation
#[derive(Parser, Debug)]
#[command(name = "cohortsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile local cohorts with the external table
    Sync(commands::sync::SyncArgs),

    /// Test the external connection and list the table's columns
    Probe(commands::probe::ProbeArgs),
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<i32> {
    match cli.command {
        Commands::Sync(args) => commands::sync::execute(args).await,
        Commands::Probe(args) => commands::probe::execute(args).await,
    }
}
