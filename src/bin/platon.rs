//! platon batch job.
//!
//! Commands:
//! - platon ingest <file>   load observation submissions into the store
//! - platon run             perform one resolution pass
//!
//! Exits non-zero only when the store cannot be opened or becomes
//! unavailable; per-observation failures are logged and counted.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use platon::ingest::parse_submissions;
use platon::storage::{open_store, PersistentConfig};
use platon::{Resolver, ResolverConfig};

/// Observation-to-entity resolution batch job
#[derive(Parser, Debug)]
#[command(name = "platon")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Data directory of the durable store
    #[arg(long, global = true, default_value = "./platon-data", env = "PLATON_DATA_DIR")]
    data_dir: PathBuf,

    /// Skip fsync after each commit
    #[arg(long, global = true, env = "PLATON_NO_SYNC")]
    no_sync: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Perform one resolution pass over unresolved observations
    Run {
        /// Seconds after which another run's claim is considered abandoned
        #[arg(long, default_value = "1800", env = "PLATON_CLAIM_TTL_SECS")]
        claim_ttl_secs: i64,

        /// Maximum number of observations to resolve in this pass
        #[arg(long, env = "PLATON_BATCH_LIMIT")]
        batch_limit: Option<usize>,

        /// Skip re-synthesis of entities with pending link changes
        #[arg(long)]
        no_repair: bool,
    },

    /// Load a JSON file of observation submissions
    Ingest {
        /// File holding one submission object or an array of them
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "platon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let store = open_store(
        &cli.store.data_dir,
        Some(PersistentConfig {
            sync_on_write: !cli.store.no_sync,
        }),
    )
    .with_context(|| format!("Failed to open store at {}", cli.store.data_dir.display()))?;

    match cli.command {
        Command::Run {
            claim_ttl_secs,
            batch_limit,
            no_repair,
        } => {
            let config = ResolverConfig {
                claim_ttl: chrono::Duration::seconds(claim_ttl_secs),
                batch_limit,
                resynthesize_pending: !no_repair,
            };
            let resolver = Resolver::new(Arc::new(store), config)
                .context("Invalid resolver configuration")?;
            let report = resolver.run().context("Resolution run aborted")?;
            info!(
                run_id = %report.run_id,
                resolved = report.resolved(),
                skipped = report.duplicates + report.failed,
                resynthesized = report.resynthesized,
                "done"
            );
        }
        Command::Ingest { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let submissions = parse_submissions(&text)
                .with_context(|| format!("Failed to parse {}", file.display()))?;

            let mut observations = 0;
            for submission in submissions.iter().cloned() {
                let (_, ids) = store
                    .ingest(submission.into_new_event())
                    .context("Failed to store submission")?;
                observations += ids.len();
            }
            info!(
                file = %file.display(),
                events = submissions.len(),
                observations,
                "ingested"
            );
        }
    }

    Ok(())
}
