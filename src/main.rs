//! Chatkeep - chat snapshot store maintenance
//!
//! Main entry point for the `chatkeep` operator CLI.

use anyhow::Result;

use chatkeep::cli::{Cli, Commands};
use chatkeep::commands::backups;
use chatkeep::config::Config;
use chatkeep::logging::init_logging;
use chatkeep::storage::SqliteSnapshotStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    init_logging(&config)?;

    let store = SqliteSnapshotStore::from_config(&config.storage)?;
    tracing::debug!("Using snapshot store at {}", store.db_path().display());

    match cli.command {
        Commands::List { json } => {
            tracing::info!("Listing backups");
            backups::list_snapshots(&store, json).await?;
        }
        Commands::Show {
            chat_key,
            timestamp,
        } => {
            backups::show_snapshot(&store, &chat_key, timestamp).await?;
        }
        Commands::Export {
            chat_key,
            timestamp,
            output,
        } => {
            if let Some(path) = &output {
                tracing::debug!("Exporting to {}", path.display());
            }
            backups::export_snapshot(&store, &chat_key, timestamp, output.as_deref()).await?;
        }
        Commands::Delete {
            chat_key,
            timestamp,
        } => {
            tracing::info!("Deleting backup {}@{}", chat_key, timestamp);
            backups::delete_snapshot(&store, &chat_key, timestamp).await?;
        }
        Commands::Prune { max } => {
            let cap = max.unwrap_or(config.backup.max_total_backups).max(1);
            tracing::info!("Pruning backups to cap {}", cap);
            backups::prune_snapshots(&store, cap).await?;
        }
    }

    Ok(())
}
