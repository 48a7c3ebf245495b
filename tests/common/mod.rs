use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chatkeep::clock::ManualClock;
use chatkeep::config::BackupConfig;
use chatkeep::copy::{CopyPipeline, CopyService};
use chatkeep::host::FakeHost;
use chatkeep::storage::{Snapshot, SqliteSnapshotStore};
use chatkeep::{BackupCoordinator, Message};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_store() -> (Arc<SqliteSnapshotStore>, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("backups.db");
    let store =
        SqliteSnapshotStore::new_with_path(db_path).expect("failed to create sqlite store with path");
    (Arc::new(store), tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#[allow(dead_code)]
pub fn conversation(len: usize) -> Vec<Message> {
    (0..len)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(format!("user turn {}", i))
            } else {
                Message::assistant(format!("assistant turn {}", i))
            }
        })
        .collect()
}

#[allow(dead_code)]
pub fn snapshot(chat_key: &str, timestamp: i64, last_message_id: usize) -> Snapshot {
    Snapshot {
        chat_key: chat_key.to_string(),
        timestamp,
        entity_name: "Alice".to_string(),
        chat_name: "main".to_string(),
        last_message_id,
        last_message_preview: String::new(),
        chat: conversation(last_message_id + 1),
        metadata: Default::default(),
    }
}

/// Coordinator over a SQLite store and a fake host with three characters
#[allow(dead_code)]
pub struct Setup {
    pub host: Arc<FakeHost>,
    pub store: Arc<SqliteSnapshotStore>,
    pub coordinator: Arc<BackupCoordinator>,
    pub _dir: TempDir,
}

#[allow(dead_code)]
pub fn setup(max_total_backups: usize) -> Setup {
    setup_with_copier(
        max_total_backups,
        Arc::new(CopyService::inline(CopyPipeline::default())),
    )
}

#[allow(dead_code)]
pub fn setup_with_copier(max_total_backups: usize, copier: Arc<CopyService>) -> Setup {
    let (store, dir) = create_temp_store();
    let host = Arc::new(FakeHost::with_characters(&["Alice", "Bob", "Carol"]));
    let config = BackupConfig {
        max_total_backups,
        debounce_delay_ms: 1_500,
        ..BackupConfig::default()
    };
    let coordinator = BackupCoordinator::new(&config, store.clone(), host.clone(), copier)
        .with_clock(Arc::new(ManualClock::new(1_000)));
    Setup {
        host,
        store,
        coordinator: Arc::new(coordinator),
        _dir: dir,
    }
}
