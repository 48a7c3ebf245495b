use crate::chat::{ChatMetadata, Message};
use serde::{Deserialize, Serialize};

/// Primary identity of a stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    /// Owning chat, formatted [`ChatKey`](crate::chat::ChatKey)
    pub chat_key: String,
    /// Capture time in epoch milliseconds
    pub timestamp: i64,
}

impl SnapshotKey {
    /// Build a key from its parts
    pub fn new(chat_key: impl Into<String>, timestamp: i64) -> Self {
        Self {
            chat_key: chat_key.into(),
            timestamp,
        }
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.chat_key, self.timestamp)
    }
}

/// One saved copy of a chat at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Owning chat, formatted [`ChatKey`](crate::chat::ChatKey)
    pub chat_key: String,
    /// Capture time in epoch milliseconds
    pub timestamp: i64,
    /// Character or group display name
    pub entity_name: String,
    /// Session display name
    pub chat_name: String,
    /// Zero-based index of the final message; the dedup key within a chat
    pub last_message_id: usize,
    /// Truncated text of the final message
    pub last_message_preview: String,
    /// Full message list
    pub chat: Vec<Message>,
    /// Session metadata
    #[serde(default)]
    pub metadata: ChatMetadata,
}

impl Snapshot {
    /// Primary key of this snapshot
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.chat_key.clone(), self.timestamp)
    }

    /// Number of messages in the snapshot
    pub fn message_count(&self) -> usize {
        self.chat.len()
    }
}
