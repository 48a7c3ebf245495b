//! Host session collaborator
//!
//! Chatkeep does not own the live chat. The application embedding it
//! implements [`HostSession`] to expose the active chat and the handful of
//! session operations restore needs, and [`Notifier`] to surface results to
//! the user.

use crate::chat::{ChatKey, ChatMetadata, EntityKind, Message};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod fake;

pub use fake::{FakeHost, HostOp};

/// Identity of the host's active chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    /// Entity kind
    pub kind: EntityKind,
    /// Character index or group id
    pub entity_id: String,
    /// Active session id
    pub session_id: String,
    /// Character or group display name
    pub entity_name: String,
    /// Session display name
    pub chat_name: String,
}

impl HostIdentity {
    /// Chat key of this identity, if it is complete
    ///
    /// Returns `None` for an empty id or session, or a non-numeric character
    /// id.
    pub fn chat_key(&self) -> Option<ChatKey> {
        if self.entity_id.is_empty() || self.session_id.is_empty() {
            return None;
        }
        match self.kind {
            EntityKind::Character => self
                .entity_id
                .parse::<usize>()
                .ok()
                .map(|index| ChatKey::character(index, self.session_id.clone())),
            EntityKind::Group => Some(ChatKey::group(
                self.entity_id.clone(),
                self.session_id.clone(),
            )),
        }
    }

    /// Whether this identity belongs to the entity named by `key`
    ///
    /// Characters compare by numeric index; groups by group id. The session
    /// id is ignored.
    pub fn is_entity(&self, key: &ChatKey) -> bool {
        match (self.kind, key.kind) {
            (EntityKind::Character, EntityKind::Character) => {
                matches!(
                    (self.entity_id.parse::<usize>().ok(), key.character_index()),
                    (Some(a), Some(b)) if a == b
                )
            }
            (EntityKind::Group, EntityKind::Group) => self.entity_id == key.entity_id,
            _ => false,
        }
    }
}

/// Live session provided by the embedding application
///
/// The live chat is handed out as a shared [`Arc`]; the host mutates it
/// copy-on-write, so a handle obtained here never changes underneath the
/// caller.
#[async_trait]
pub trait HostSession: Send + Sync {
    /// Identity of the active chat, if any
    ///
    /// Synchronous so trigger handlers can record which chat they fired for
    /// before yielding.
    fn current_identity(&self) -> Option<HostIdentity>;

    /// Messages of the active chat
    async fn current_chat(&self) -> Arc<Vec<Message>>;

    /// Metadata of the active chat
    async fn current_metadata(&self) -> Arc<ChatMetadata>;

    /// Number of characters the host knows about
    async fn character_count(&self) -> usize;

    /// Switch to an entity
    async fn select_entity(&self, kind: EntityKind, entity_id: &str) -> Result<()>;

    /// Start a new, empty session for the selected entity without deleting
    /// any existing one
    async fn start_new_session(&self) -> Result<()>;

    /// Remove every message from the active chat
    async fn clear_chat(&self) -> Result<()>;

    /// Append messages to the active chat, in order
    async fn append_messages(&self, messages: Vec<Message>) -> Result<()>;

    /// Replace the active chat's metadata
    async fn set_metadata(&self, metadata: ChatMetadata) -> Result<()>;

    /// Re-render the active chat
    async fn render_chat(&self) -> Result<()>;

    /// Scroll the chat view to the last message
    async fn scroll_to_end(&self) -> Result<()>;

    /// Persist the active session
    async fn save_session(&self) -> Result<()>;

    /// Tell downstream listeners the session content changed
    async fn announce_session_changed(&self) -> Result<()>;
}

/// User-facing reporting surface
pub trait Notifier: Send + Sync {
    /// The stored snapshot list changed; refresh any listing
    fn backups_changed(&self);

    /// Show a success message
    fn report_success(&self, message: &str);

    /// Show a failure message
    fn report_failure(&self, message: &str);
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn backups_changed(&self) {
        tracing::debug!("Backup list changed");
    }

    fn report_success(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn report_failure(&self, message: &str) {
        tracing::error!("{}", message);
    }
}
