//! Chat log types and chat identity
//!
//! A chat is an ordered list of [`Message`]s plus a free-form
//! [`ChatMetadata`] blob. Its identity is a [`ChatKey`]: the entity kind,
//! the entity id, and the session id.

use crate::error::ChatkeepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Auxiliary key/value blob stored alongside a chat
pub type ChatMetadata = serde_json::Map<String, serde_json::Value>;

/// A single chat message
///
/// Fields the pipeline does not interpret (swipes, generation info, and so
/// on) are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: String,
    /// Display name of the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Message text
    #[serde(default)]
    pub content: String,
    /// Host-specific fields carried through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Creates a new message with the given role
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: None,
            content: content.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use chatkeep::chat::Message;
    ///
    /// let msg = Message::user("Hello!");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Sets the sender display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches a host-specific field
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Kind of entity that owns a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A single character, addressed by its index in the host's list
    Character,
    /// A group chat, addressed by its string id
    Group,
}

impl EntityKind {
    fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Character => "character",
            EntityKind::Group => "group",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a chat log
///
/// Formats as `<kind>:<entity_id>:<session_id>`, e.g.
/// `character:3:Alice - 2024-05-01@12h00m`. The session id is the last
/// segment and may itself contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatKey {
    /// Entity kind
    pub kind: EntityKind,
    /// Character index or group id
    pub entity_id: String,
    /// Session (chat file) id
    pub session_id: String,
}

impl ChatKey {
    /// Key for a character chat
    pub fn character(index: usize, session_id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Character,
            entity_id: index.to_string(),
            session_id: session_id.into(),
        }
    }

    /// Key for a group chat
    pub fn group(group_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Group,
            entity_id: group_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Character index, when this is a character chat with a numeric id
    pub fn character_index(&self) -> Option<usize> {
        match self.kind {
            EntityKind::Character => self.entity_id.parse().ok(),
            EntityKind::Group => None,
        }
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.entity_id, self.session_id)
    }
}

impl FromStr for ChatKey {
    type Err = ChatkeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(entity_id), Some(session_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ChatkeepError::InvalidChatKey(format!(
                "expected <kind>:<id>:<session>, got '{}'",
                s
            )));
        };

        let kind = match kind {
            "character" => EntityKind::Character,
            "group" => EntityKind::Group,
            other => {
                return Err(ChatkeepError::InvalidChatKey(format!(
                    "unknown entity kind '{}'",
                    other
                )))
            }
        };

        if entity_id.is_empty() || session_id.is_empty() {
            return Err(ChatkeepError::InvalidChatKey(format!(
                "empty entity or session id in '{}'",
                s
            )));
        }

        if kind == EntityKind::Character && entity_id.parse::<usize>().is_err() {
            return Err(ChatkeepError::InvalidChatKey(format!(
                "character id '{}' is not an index",
                entity_id
            )));
        }

        Ok(Self {
            kind,
            entity_id: entity_id.to_string(),
            session_id: session_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_key_display() {
        assert_eq!(
            ChatKey::character(2, "Alice - 2024").to_string(),
            "character:2:Alice - 2024"
        );
        assert_eq!(ChatKey::group("g17", "s1").to_string(), "group:g17:s1");
    }

    #[test]
    fn test_chat_key_parse_keeps_colons_in_session() {
        let key: ChatKey = "group:g17:2024-05-01@12:00".parse().unwrap();
        assert_eq!(key.kind, EntityKind::Group);
        assert_eq!(key.entity_id, "g17");
        assert_eq!(key.session_id, "2024-05-01@12:00");
    }

    #[test]
    fn test_chat_key_parse_character_index() {
        let key: ChatKey = "character:5:main".parse().unwrap();
        assert_eq!(key.character_index(), Some(5));
    }

    #[test]
    fn test_chat_key_rejects_malformed() {
        for bad in [
            "",
            "character",
            "character:1",
            "robot:1:s",
            "character:abc:s",
            "group::s",
            "character:1:",
        ] {
            assert!(bad.parse::<ChatKey>().is_err(), "'{}' should not parse", bad);
        }
    }

    #[test]
    fn test_message_extra_fields_survive_json() {
        let json = r#"{"role":"assistant","name":"Bot","content":"hi","swipe_id":2}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.name.as_deref(), Some("Bot"));
        assert_eq!(msg.extra.get("swipe_id"), Some(&serde_json::json!(2)));

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["swipe_id"], 2);
    }
}
