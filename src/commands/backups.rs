//! Snapshot store maintenance commands

use std::path::Path;

use chrono::{Local, TimeZone};
use colored::Colorize;
use prettytable::{format, Table};

use crate::capture::enforce_retention;
use crate::coordinator::sort_newest_first;
use crate::error::{ChatkeepError, Result};
use crate::storage::{Snapshot, SnapshotStore};

/// Format a millisecond timestamp in local time
pub fn format_timestamp(timestamp: i64) -> String {
    match Local.timestamp_millis_opt(timestamp).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

/// Build the listing table for `snapshots`, in the given order
pub fn snapshot_table(snapshots: &[Snapshot]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "Chat Key".bold(),
        "Timestamp".bold(),
        "Saved".bold(),
        "Entity".bold(),
        "Chat".bold(),
        "Messages".bold(),
        "Last Message".bold()
    ]);

    for snapshot in snapshots {
        table.add_row(prettytable::row![
            snapshot.chat_key.cyan(),
            snapshot.timestamp,
            format_timestamp(snapshot.timestamp),
            snapshot.entity_name,
            snapshot.chat_name,
            snapshot.message_count(),
            snapshot.last_message_preview
        ]);
    }
    table
}

/// Print every snapshot, newest first
pub async fn list_snapshots(store: &dyn SnapshotStore, json: bool) -> Result<()> {
    let mut snapshots = store.get_all().await?;
    sort_newest_first(&mut snapshots);

    if json {
        let keys: Vec<serde_json::Value> = snapshots
            .iter()
            .map(|s| {
                serde_json::json!({
                    "chat_key": s.chat_key,
                    "timestamp": s.timestamp,
                    "entity_name": s.entity_name,
                    "chat_name": s.chat_name,
                    "messages": s.message_count(),
                    "last_message_id": s.last_message_id,
                    "last_message_preview": s.last_message_preview,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    if snapshots.is_empty() {
        println!("{}", "No backups found.".yellow());
        return Ok(());
    }

    println!("\nBackups ({}):", snapshots.len());
    snapshot_table(&snapshots).printstd();
    println!();
    println!(
        "Use {} to inspect one.",
        "chatkeep show <CHAT_KEY> <TIMESTAMP>".cyan()
    );
    println!();
    Ok(())
}

async fn load(store: &dyn SnapshotStore, chat_key: &str, timestamp: i64) -> Result<Snapshot> {
    store.get(chat_key, timestamp).await?.ok_or_else(|| {
        ChatkeepError::SnapshotNotFound {
            chat_key: chat_key.to_string(),
            timestamp,
        }
        .into()
    })
}

/// Print the messages of one snapshot
pub async fn show_snapshot(store: &dyn SnapshotStore, chat_key: &str, timestamp: i64) -> Result<()> {
    let snapshot = load(store, chat_key, timestamp).await?;

    println!(
        "{} {} / {} ({})",
        "Backup".bold(),
        snapshot.entity_name.green(),
        snapshot.chat_name,
        format_timestamp(snapshot.timestamp)
    );
    println!();
    for (index, message) in snapshot.chat.iter().enumerate() {
        let speaker = message.name.as_deref().unwrap_or(&message.role);
        println!("{:>4} {}: {}", index, speaker.cyan(), message.content);
    }
    Ok(())
}

/// Serialize one snapshot as pretty JSON
pub fn export_json(snapshot: &Snapshot) -> Result<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Write one snapshot as JSON to `output`, or stdout
pub async fn export_snapshot(
    store: &dyn SnapshotStore,
    chat_key: &str,
    timestamp: i64,
    output: Option<&Path>,
) -> Result<()> {
    let snapshot = load(store, chat_key, timestamp).await?;
    let json = export_json(&snapshot)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!(
                "{}",
                format!("Exported {} to {}", snapshot.key(), path.display()).green()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Delete one snapshot
pub async fn delete_snapshot(store: &dyn SnapshotStore, chat_key: &str, timestamp: i64) -> Result<()> {
    store.delete(chat_key, timestamp).await?;
    println!(
        "{}",
        format!("Deleted backup {}@{}", chat_key, timestamp).green()
    );
    Ok(())
}

/// Evict the oldest snapshots until at most `cap` remain
pub async fn prune_snapshots(store: &dyn SnapshotStore, cap: usize) -> Result<()> {
    let evicted = enforce_retention(store, cap).await?;
    if evicted.is_empty() {
        println!("{}", format!("Nothing to prune (cap {}).", cap).yellow());
    } else {
        for key in &evicted {
            println!("  {} {}", "evicted".red(), key);
        }
        println!(
            "{}",
            format!("Pruned {} backup(s) to cap {}.", evicted.len(), cap).green()
        );
    }
    Ok(())
}
