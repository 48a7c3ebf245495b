//! Durable snapshot storage
//!
//! [`SnapshotStore`] is the async storage seam used by the capture pipeline,
//! restore, and the CLI. [`SqliteSnapshotStore`] is the durable system of
//! record; [`InMemorySnapshotStore`] backs ephemeral sessions and tests.
//!
//! Records are keyed by `(chat_key, timestamp)` with a secondary,
//! non-unique index on `chat_key`. Every mutation is a single-row
//! transaction: puts are upserts and deletes of absent keys succeed, so the
//! capture sequence can be interrupted between any two calls.

use crate::config::StorageConfig;
use crate::error::{ChatkeepError, Result};
use async_trait::async_trait;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod memory;
pub mod types;

pub use memory::InMemorySnapshotStore;
pub use types::{Snapshot, SnapshotKey};

/// Async snapshot storage
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace a snapshot under its `(chat_key, timestamp)` key
    async fn put(&self, snapshot: &Snapshot) -> Result<()>;

    /// Fetch one snapshot
    async fn get(&self, chat_key: &str, timestamp: i64) -> Result<Option<Snapshot>>;

    /// All snapshots belonging to one chat, in no particular order
    async fn get_by_chat_key(&self, chat_key: &str) -> Result<Vec<Snapshot>>;

    /// Every stored snapshot, in no particular order
    async fn get_all(&self) -> Result<Vec<Snapshot>>;

    /// Every stored key without loading payloads
    async fn get_all_keys(&self) -> Result<Vec<SnapshotKey>>;

    /// Remove one snapshot; succeeds when the key is already absent
    async fn delete(&self, chat_key: &str, timestamp: i64) -> Result<()>;

    /// Number of stored snapshots
    async fn count(&self) -> Result<usize> {
        Ok(self.get_all_keys().await?.len())
    }
}

/// Map a lower-level error into `ChatkeepError::Storage` with context
fn storage_err<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> ChatkeepError {
    move |e| ChatkeepError::Storage(format!("{}: {}", what, e))
}

/// Snapshot store backed by a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    db_path: PathBuf,
}

impl SqliteSnapshotStore {
    /// Open the store in the user's data directory
    ///
    /// `CHATKEEP_DB` overrides the location.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("CHATKEEP_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "chatkeep", "chatkeep")
            .ok_or_else(|| ChatkeepError::Storage("Could not determine data directory".into()))?;

        Self::new_with_path(proj_dirs.data_dir().join("backups.db"))
    }

    /// Open the store configured by `config`, falling back to [`Self::new`]
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match &config.db_path {
            Some(path) => Self::new_with_path(path.clone()),
            None => Self::new(),
        }
    }

    /// Open (creating if needed) the store at `db_path`
    ///
    /// # Examples
    ///
    /// ```
    /// use chatkeep::storage::SqliteSnapshotStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteSnapshotStore::new_with_path(dir.path().join("backups.db")).unwrap();
    /// assert!(store.db_path().exists());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(storage_err("Failed to create parent directory for database"))?;
            }
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Location of the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(storage_err("Failed to open database"))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(storage_err("Failed to set busy timeout"))?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = Self::open(&self.db_path)?;

        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(storage_err("Failed to enable WAL"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshots (
                chat_key TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                entity_name TEXT NOT NULL,
                chat_name TEXT NOT NULL,
                last_message_id INTEGER NOT NULL,
                last_message_preview TEXT NOT NULL,
                chat JSON NOT NULL,
                metadata JSON NOT NULL,
                PRIMARY KEY (chat_key, timestamp)
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_chat_key ON snapshots (chat_key);",
        )
        .map_err(storage_err("Failed to create tables"))?;

        Ok(())
    }

    /// Run `f` against a fresh connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Self::open(&db_path)?;
            f(&mut conn)
        })
        .await
        .map_err(storage_err("Storage task failed"))?
    }
}

const SELECT_COLUMNS: &str = "chat_key, timestamp, entity_name, chat_name, last_message_id,
    last_message_preview, chat, metadata";

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    let last_message_id: i64 = row.get(4)?;
    let last_message_id = usize::try_from(last_message_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Integer, Box::new(e))
    })?;
    let chat_json: String = row.get(6)?;
    let metadata_json: String = row.get(7)?;

    let chat = serde_json::from_str(&chat_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let metadata = serde_json::from_str(&metadata_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Snapshot {
        chat_key: row.get(0)?,
        timestamp: row.get(1)?,
        entity_name: row.get(2)?,
        chat_name: row.get(3)?,
        last_message_id,
        last_message_preview: row.get(5)?,
        chat,
        metadata,
    })
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn put(&self, snapshot: &Snapshot) -> Result<()> {
        let chat_json =
            serde_json::to_string(&snapshot.chat).map_err(storage_err("Failed to serialize chat"))?;
        let metadata_json = serde_json::to_string(&snapshot.metadata)
            .map_err(storage_err("Failed to serialize metadata"))?;
        let row = (
            snapshot.chat_key.clone(),
            snapshot.timestamp,
            snapshot.entity_name.clone(),
            snapshot.chat_name.clone(),
            snapshot.last_message_id as i64,
            snapshot.last_message_preview.clone(),
        );

        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(storage_err("Failed to start transaction"))?;
            tx.execute(
                "INSERT OR REPLACE INTO snapshots (chat_key, timestamp, entity_name, chat_name,
                    last_message_id, last_message_preview, chat, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![row.0, row.1, row.2, row.3, row.4, row.5, chat_json, metadata_json],
            )
            .map_err(storage_err("Failed to write snapshot"))?;
            tx.commit()
                .map_err(storage_err("Failed to commit transaction"))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, chat_key: &str, timestamp: i64) -> Result<Option<Snapshot>> {
        let chat_key = chat_key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM snapshots WHERE chat_key = ? AND timestamp = ?",
                    SELECT_COLUMNS
                ),
                params![chat_key, timestamp],
                row_to_snapshot,
            )
            .optional()
            .map_err(storage_err("Failed to query snapshot"))
            .map_err(Into::into)
        })
        .await
    }

    async fn get_by_chat_key(&self, chat_key: &str) -> Result<Vec<Snapshot>> {
        let chat_key = chat_key.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM snapshots WHERE chat_key = ?",
                    SELECT_COLUMNS
                ))
                .map_err(storage_err("Failed to prepare statement"))?;
            let rows = stmt
                .query_map(params![chat_key], row_to_snapshot)
                .map_err(storage_err("Failed to query snapshots"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err("Failed to read snapshot row"))
                .map_err(Into::into)
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<Snapshot>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM snapshots", SELECT_COLUMNS))
                .map_err(storage_err("Failed to prepare statement"))?;
            let rows = stmt
                .query_map([], row_to_snapshot)
                .map_err(storage_err("Failed to query snapshots"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err("Failed to read snapshot row"))
                .map_err(Into::into)
        })
        .await
    }

    async fn get_all_keys(&self) -> Result<Vec<SnapshotKey>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT chat_key, timestamp FROM snapshots")
                .map_err(storage_err("Failed to prepare statement"))?;
            let rows = stmt
                .query_map([], |row| Ok(SnapshotKey::new(row.get::<_, String>(0)?, row.get(1)?)))
                .map_err(storage_err("Failed to query keys"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err("Failed to read key row"))
                .map_err(Into::into)
        })
        .await
    }

    async fn delete(&self, chat_key: &str, timestamp: i64) -> Result<()> {
        let chat_key = chat_key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM snapshots WHERE chat_key = ? AND timestamp = ?",
                params![chat_key, timestamp],
            )
            .map_err(storage_err("Failed to delete snapshot"))?;
            Ok(())
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT count(*) FROM snapshots", [], |r| r.get(0))
                .map_err(storage_err("Failed to count snapshots"))?;
            Ok(count as usize)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Message;
    use serial_test::serial;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteSnapshotStore, tempfile::TempDir) {
        let dir = tempdir().expect("failed to create tempdir");
        let store = SqliteSnapshotStore::new_with_path(dir.path().join("backups.db"))
            .expect("failed to create store");
        (store, dir)
    }

    fn snapshot(chat_key: &str, timestamp: i64, messages: usize) -> Snapshot {
        let chat: Vec<Message> = (0..messages)
            .map(|i| Message::user(format!("message {}", i)))
            .collect();
        let mut metadata = serde_json::Map::new();
        metadata.insert("note".to_string(), serde_json::json!("kept"));
        Snapshot {
            chat_key: chat_key.to_string(),
            timestamp,
            entity_name: "Alice".to_string(),
            chat_name: "main".to_string(),
            last_message_id: messages.saturating_sub(1),
            last_message_preview: format!("message {}", messages.saturating_sub(1)),
            chat,
            metadata,
        }
    }

    #[test]
    fn test_init_creates_table_and_index() {
        let (store, _dir) = create_test_store();
        let conn = Connection::open(store.db_path()).expect("open connection");
        let tables: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='snapshots'",
                [],
                |r| r.get(0),
            )
            .expect("query tables");
        let indexes: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='index' AND name='idx_snapshots_chat_key'",
                [],
                |r| r.get(0),
            )
            .expect("query indexes");
        assert_eq!(tables, 1);
        assert_eq!(indexes, 1);
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let (store, _dir) = create_test_store();
        let snap = snapshot("character:0:main", 100, 3);
        store.put(&snap).await.expect("put failed");

        let loaded = store
            .get("character:0:main", 100)
            .await
            .expect("get failed")
            .expect("snapshot missing");
        assert_eq!(loaded, snap);
    }

    #[tokio::test]
    async fn test_put_is_idempotent_upsert() {
        let (store, _dir) = create_test_store();
        let mut snap = snapshot("character:0:main", 100, 2);
        store.put(&snap).await.expect("first put failed");
        snap.chat_name = "renamed".to_string();
        store.put(&snap).await.expect("second put failed");

        assert_eq!(store.count().await.unwrap(), 1);
        let loaded = store.get("character:0:main", 100).await.unwrap().unwrap();
        assert_eq!(loaded.chat_name, "renamed");
    }

    #[tokio::test]
    async fn test_get_by_chat_key_filters() {
        let (store, _dir) = create_test_store();
        store.put(&snapshot("character:0:a", 1, 1)).await.unwrap();
        store.put(&snapshot("character:0:a", 2, 2)).await.unwrap();
        store.put(&snapshot("group:g1:b", 3, 1)).await.unwrap();

        let a = store.get_by_chat_key("character:0:a").await.unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|s| s.chat_key == "character:0:a"));

        let none = store.get_by_chat_key("character:9:x").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_get_all_keys_matches_get_all() {
        let (store, _dir) = create_test_store();
        store.put(&snapshot("character:0:a", 1, 1)).await.unwrap();
        store.put(&snapshot("group:g1:b", 2, 1)).await.unwrap();

        let mut keys = store.get_all_keys().await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                SnapshotKey::new("character:0:a", 1),
                SnapshotKey::new("group:g1:b", 2)
            ]
        );
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _dir) = create_test_store();
        store.put(&snapshot("character:0:a", 1, 1)).await.unwrap();

        store.delete("character:0:a", 1).await.expect("first delete");
        store.delete("character:0:a", 1).await.expect("second delete");
        assert!(store.get("character:0:a", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backups.db");
        {
            let store = SqliteSnapshotStore::new_with_path(&path).unwrap();
            store.put(&snapshot("character:1:s", 7, 4)).await.unwrap();
        }
        let reopened = SqliteSnapshotStore::new_with_path(&path).unwrap();
        let loaded = reopened.get("character:1:s", 7).await.unwrap().unwrap();
        assert_eq!(loaded.chat.len(), 4);
        assert_eq!(loaded.metadata.get("note"), Some(&serde_json::json!("kept")));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_storage_error() {
        let (store, _dir) = create_test_store();
        store.put(&snapshot("character:0:a", 1, 1)).await.unwrap();
        let conn = Connection::open(store.db_path()).unwrap();
        conn.execute("UPDATE snapshots SET chat = 'not json'", [])
            .unwrap();

        let err = store.get("character:0:a", 1).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatkeepError>(),
            Some(ChatkeepError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_last_message_id_is_storage_error() {
        let (store, _dir) = create_test_store();
        store.put(&snapshot("character:0:a", 1, 1)).await.unwrap();
        let conn = Connection::open(store.db_path()).unwrap();
        conn.execute("UPDATE snapshots SET last_message_id = -4", [])
            .unwrap();

        let err = store.get("character:0:a", 1).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatkeepError>(),
            Some(ChatkeepError::Storage(_))
        ));
        assert!(store.get_by_chat_key("character:0:a").await.is_err());
    }

    #[test]
    #[serial]
    fn test_new_respects_env_override() {
        let dir = tempdir().expect("failed to create tempdir");
        let db_path = dir.path().join("nested").join("backups.db");
        std::env::set_var("CHATKEEP_DB", db_path.to_string_lossy().to_string());

        let store = SqliteSnapshotStore::new().expect("new failed with env override");
        std::env::remove_var("CHATKEEP_DB");

        assert_eq!(store.db_path(), db_path.as_path());
        assert!(db_path.parent().unwrap().exists());
    }
}
