//! Inventory ledger maintenance tool
//!
//! Loads the ledger snapshot, runs one maintenance operation and writes the
//! result back. The report is printed to stdout as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use inventory_ledger_backend::{store, Config, LedgerService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ledger-maint", about = "Inventory ledger maintenance operations")]
struct Cli {
    /// Snapshot file (default: storage.snapshot_path from configuration).
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the report without writing the snapshot back.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Recompute every product's stock from the order history.
    Recalculate,
    /// Merge products whose names normalize to the same key.
    MergeDuplicates,
    /// Report drift between stored and reconciled stock without writing.
    Audit,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only the report
    if config.logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;
    init_tracing(&config);

    let path = cli
        .snapshot
        .unwrap_or_else(|| PathBuf::from(&config.storage.snapshot_path));
    tracing::info!(environment = %config.environment, snapshot = %path.display(), command = ?cli.command, "Starting ledger maintenance");

    let memory = Arc::new(store::load_snapshot(&path).await?);
    let ledger = LedgerService::new(memory.clone(), config.ledger.clone());

    let report = match cli.command {
        Command::Recalculate => serde_json::to_value(ledger.recalculate_inventory_from_orders().await?)?,
        Command::MergeDuplicates => {
            serde_json::to_value(ledger.clean_and_merge_duplicate_products().await?)?
        }
        Command::Audit => serde_json::to_value(ledger.audit_inventory().await?)?,
    };

    let writes = !matches!(cli.command, Command::Audit);
    if writes && !cli.dry_run {
        store::save_snapshot(&memory, &path).await?;
        tracing::info!(snapshot = %path.display(), "Snapshot saved");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
