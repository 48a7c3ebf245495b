//! Chatkeep - incremental chat snapshots with bounded retention
//!
//! This library snapshots an evolving chat log into a durable local store,
//! keeps a bounded number of the most recent snapshots across all chats, and
//! replays a chosen snapshot into a fresh host session.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `storage`: Snapshot records and the SQLite / in-memory stores
//! - `copy`: Deep-copy strategies and the offloaded copy worker
//! - `capture`: The capture sequence (dedup and global retention)
//! - `coordinator`: Trigger scheduling, single-flight, UI operations
//! - `restore`: Restore state machine
//! - `host`: Host session and notifier seams, plus an in-memory fake
//! - `events`: Trigger kinds and the event subscription seam
//! - `config`: Configuration management and normalization
//! - `logging`: Subscriber setup for the binary
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Operator CLI
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatkeep::{BackupCoordinator, Config, CopyService, LocalEventBus};
//! use chatkeep::copy::CopyPipeline;
//! use chatkeep::host::FakeHost;
//! use chatkeep::storage::SqliteSnapshotStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     let store = Arc::new(SqliteSnapshotStore::from_config(&config.storage)?);
//!     let copier = Arc::new(CopyService::start(
//!         CopyPipeline::default(),
//!         config.backup.offload_timeout(),
//!     ));
//!     let host = Arc::new(FakeHost::with_characters(&["Alice"]));
//!
//!     let coordinator = Arc::new(BackupCoordinator::new(&config.backup, store, host, copier));
//!     let bus = LocalEventBus::new();
//!     coordinator.register(&bus);
//!
//!     coordinator.manual_capture().await?;
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod chat;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod copy;
pub mod error;
pub mod events;
pub mod host;
pub mod logging;
pub mod restore;
pub mod storage;

// Re-export commonly used types
pub use capture::{CaptureOutcome, RetentionPolicy, SkipReason};
pub use chat::{ChatKey, ChatMetadata, EntityKind, Message};
pub use config::Config;
pub use coordinator::BackupCoordinator;
pub use copy::{CopyPipeline, CopyService};
pub use error::{ChatkeepError, Result};
pub use events::{EventSource, LocalEventBus, TriggerKind};
pub use host::{HostIdentity, HostSession, Notifier};
pub use restore::{RestoreFailure, RestoreReport, RestoreState};
pub use storage::{InMemorySnapshotStore, Snapshot, SnapshotKey, SnapshotStore, SqliteSnapshotStore};

#[cfg(test)]
pub mod test_utils;
