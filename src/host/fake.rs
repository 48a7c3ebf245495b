//! In-memory fake host for tests and demos
//!
//! [`FakeHost`] implements [`HostSession`] over plain in-memory state: a
//! character list, a group list, the active chat, and a map of saved
//! sessions. Tests drive it directly (open a chat, push or edit messages)
//! and can make any host operation fail with [`FakeHost::fail_on`].
//!
//! # Example
//!
//! ```
//! use chatkeep::chat::Message;
//! use chatkeep::host::{FakeHost, HostSession};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let host = FakeHost::with_characters(&["Alice", "Bob"]);
//! host.open_character_chat(1, "Bob - 2024", vec![Message::user("hi")]);
//!
//! let identity = host.current_identity().unwrap();
//! assert_eq!(identity.entity_name, "Bob");
//! assert_eq!(host.current_chat().await.len(), 1);
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use super::{HostIdentity, HostSession};
use crate::chat::{ChatMetadata, EntityKind, Message};
use crate::error::Result;

/// Host operations that can be observed or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    /// `select_entity`
    SelectEntity,
    /// `start_new_session`
    StartNewSession,
    /// `clear_chat`
    ClearChat,
    /// `append_messages`
    AppendMessages,
    /// `set_metadata`
    SetMetadata,
    /// `render_chat`
    RenderChat,
    /// `scroll_to_end`
    ScrollToEnd,
    /// `save_session`
    SaveSession,
    /// `announce_session_changed`
    AnnounceSessionChanged,
}

#[derive(Debug, Clone, Default)]
struct SavedSession {
    chat: Vec<Message>,
    metadata: ChatMetadata,
}

#[derive(Debug, Default)]
struct FakeHostState {
    characters: Vec<String>,
    groups: Vec<(String, String)>,
    active: Option<HostIdentity>,
    chat: Arc<Vec<Message>>,
    metadata: Arc<ChatMetadata>,
    saved: HashMap<String, SavedSession>,
    failures: HashSet<HostOp>,
    drift_on_new_session: Option<HostIdentity>,
    session_counter: u64,
    calls: Vec<HostOp>,
    announcements: usize,
    read_delay: Option<Duration>,
    render_delay: Option<Duration>,
}

/// In-memory [`HostSession`]
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<FakeHostState>,
}

impl FakeHost {
    /// Host with no characters, groups, or active chat
    pub fn new() -> Self {
        Self::default()
    }

    /// Host knowing the given characters, by index
    pub fn with_characters(names: &[&str]) -> Self {
        let host = Self::new();
        host.lock().characters = names.iter().map(|n| n.to_string()).collect();
        host
    }

    /// Register a group
    pub fn add_group(&self, group_id: &str, name: &str) {
        self.lock()
            .groups
            .push((group_id.to_string(), name.to_string()));
    }

    fn lock(&self) -> MutexGuard<'_, FakeHostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make the active chat a character chat with the given messages
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a known character.
    pub fn open_character_chat(&self, index: usize, session_id: &str, messages: Vec<Message>) {
        let mut state = self.lock();
        let name = state
            .characters
            .get(index)
            .cloned()
            .unwrap_or_else(|| panic!("no character at index {}", index));
        state.active = Some(HostIdentity {
            kind: EntityKind::Character,
            entity_id: index.to_string(),
            session_id: session_id.to_string(),
            entity_name: name,
            chat_name: session_id.to_string(),
        });
        state.chat = Arc::new(messages);
        state.metadata = Arc::new(ChatMetadata::new());
    }

    /// Make the active chat a group chat with the given messages
    ///
    /// Registers the group if it is unknown.
    pub fn open_group_chat(&self, group_id: &str, session_id: &str, messages: Vec<Message>) {
        let mut state = self.lock();
        let name = match state.groups.iter().find(|(id, _)| id == group_id) {
            Some((_, name)) => name.clone(),
            None => {
                state
                    .groups
                    .push((group_id.to_string(), group_id.to_string()));
                group_id.to_string()
            }
        };
        state.active = Some(HostIdentity {
            kind: EntityKind::Group,
            entity_id: group_id.to_string(),
            session_id: session_id.to_string(),
            entity_name: name,
            chat_name: session_id.to_string(),
        });
        state.chat = Arc::new(messages);
        state.metadata = Arc::new(ChatMetadata::new());
    }

    /// Leave no chat active
    pub fn close_chat(&self) {
        let mut state = self.lock();
        state.active = None;
        state.chat = Arc::new(Vec::new());
        state.metadata = Arc::new(ChatMetadata::new());
    }

    /// Append one message to the live chat
    pub fn push_message(&self, message: Message) {
        Arc::make_mut(&mut self.lock().chat).push(message);
    }

    /// Replace the text of one live message
    pub fn edit_message(&self, index: usize, content: &str) {
        if let Some(message) = Arc::make_mut(&mut self.lock().chat).get_mut(index) {
            message.content = content.to_string();
        }
    }

    /// Drop the last live message
    pub fn delete_last_message(&self) {
        Arc::make_mut(&mut self.lock().chat).pop();
    }

    /// Set one key of the live metadata
    pub fn set_live_metadata(&self, key: &str, value: serde_json::Value) {
        Arc::make_mut(&mut self.lock().metadata).insert(key.to_string(), value);
    }

    /// Active identity
    pub fn identity(&self) -> Option<HostIdentity> {
        self.lock().active.clone()
    }

    /// Copy of the live chat
    pub fn chat(&self) -> Vec<Message> {
        self.lock().chat.as_ref().clone()
    }

    /// Copy of the live metadata
    pub fn metadata(&self) -> ChatMetadata {
        self.lock().metadata.as_ref().clone()
    }

    /// Make `op` fail until [`Self::clear_failures`]
    pub fn fail_on(&self, op: HostOp) {
        self.lock().failures.insert(op);
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Have the next `start_new_session` land on `identity` instead
    pub fn drift_on_new_session(&self, identity: HostIdentity) {
        self.lock().drift_on_new_session = Some(identity);
    }

    /// Delay `current_chat` reads, to hold a capture in flight
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.lock().read_delay = delay;
    }

    /// Delay `render_chat` by `delay`, leaving the injected log visible
    pub fn set_render_delay(&self, delay: Option<Duration>) {
        self.lock().render_delay = delay;
    }

    /// Every operation attempted so far, in order
    pub fn calls(&self) -> Vec<HostOp> {
        self.lock().calls.clone()
    }

    /// Messages persisted by `save_session` for `chat_key`
    pub fn saved_chat(&self, chat_key: &str) -> Option<Vec<Message>> {
        self.lock().saved.get(chat_key).map(|s| s.chat.clone())
    }

    /// Metadata persisted by `save_session` for `chat_key`
    pub fn saved_metadata(&self, chat_key: &str) -> Option<ChatMetadata> {
        self.lock().saved.get(chat_key).map(|s| s.metadata.clone())
    }

    /// How many times the session-changed event was announced
    pub fn announcements(&self) -> usize {
        self.lock().announcements
    }

    /// Record `op` and fail if it was configured to
    fn begin(&self, op: HostOp) -> Result<MutexGuard<'_, FakeHostState>> {
        let mut state = self.lock();
        state.calls.push(op);
        if state.failures.contains(&op) {
            return Err(anyhow!("simulated host failure in {:?}", op));
        }
        Ok(state)
    }
}

fn entity_identity(
    state: &FakeHostState,
    kind: EntityKind,
    entity_id: &str,
) -> Result<HostIdentity> {
    let entity_name = match kind {
        EntityKind::Character => {
            let index: usize = entity_id
                .parse()
                .map_err(|_| anyhow!("character id '{}' is not an index", entity_id))?;
            state
                .characters
                .get(index)
                .cloned()
                .ok_or_else(|| anyhow!("no character at index {}", index))?
        }
        EntityKind::Group => state
            .groups
            .iter()
            .find(|(id, _)| id == entity_id)
            .map(|(_, name)| name.clone())
            .ok_or_else(|| anyhow!("no group with id '{}'", entity_id))?,
    };

    Ok(HostIdentity {
        kind,
        entity_id: entity_id.to_string(),
        session_id: "main".to_string(),
        entity_name,
        chat_name: "main".to_string(),
    })
}

#[async_trait]
impl HostSession for FakeHost {
    fn current_identity(&self) -> Option<HostIdentity> {
        self.identity()
    }

    async fn current_chat(&self) -> Arc<Vec<Message>> {
        let delay = self.lock().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Arc::clone(&self.lock().chat)
    }

    async fn current_metadata(&self) -> Arc<ChatMetadata> {
        Arc::clone(&self.lock().metadata)
    }

    async fn character_count(&self) -> usize {
        self.lock().characters.len()
    }

    async fn select_entity(&self, kind: EntityKind, entity_id: &str) -> Result<()> {
        let mut state = self.begin(HostOp::SelectEntity)?;

        if let Some(active) = &state.active {
            if active.kind == kind && active.entity_id == entity_id {
                return Ok(());
            }
        }

        let identity = entity_identity(&state, kind, entity_id)?;
        let key = identity
            .chat_key()
            .map(|k| k.to_string())
            .unwrap_or_default();
        let saved = state.saved.get(&key).cloned().unwrap_or_default();
        state.chat = Arc::new(saved.chat);
        state.metadata = Arc::new(saved.metadata);
        state.active = Some(identity);
        Ok(())
    }

    async fn start_new_session(&self) -> Result<()> {
        let mut state = self.begin(HostOp::StartNewSession)?;
        let Some(active) = state.active.clone() else {
            return Err(anyhow!("no entity selected"));
        };

        state.session_counter += 1;
        let session_id = format!("{} - session {}", active.entity_name, state.session_counter);
        let next = match state.drift_on_new_session.take() {
            Some(drifted) => drifted,
            None => HostIdentity {
                session_id: session_id.clone(),
                chat_name: session_id,
                ..active
            },
        };

        state.active = Some(next);
        state.chat = Arc::new(Vec::new());
        state.metadata = Arc::new(ChatMetadata::new());
        Ok(())
    }

    async fn clear_chat(&self) -> Result<()> {
        let mut state = self.begin(HostOp::ClearChat)?;
        state.chat = Arc::new(Vec::new());
        Ok(())
    }

    async fn append_messages(&self, messages: Vec<Message>) -> Result<()> {
        let mut state = self.begin(HostOp::AppendMessages)?;
        Arc::make_mut(&mut state.chat).extend(messages);
        Ok(())
    }

    async fn set_metadata(&self, metadata: ChatMetadata) -> Result<()> {
        let mut state = self.begin(HostOp::SetMetadata)?;
        state.metadata = Arc::new(metadata);
        Ok(())
    }

    async fn render_chat(&self) -> Result<()> {
        let delay = self.begin(HostOp::RenderChat)?.render_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn scroll_to_end(&self) -> Result<()> {
        self.begin(HostOp::ScrollToEnd)?;
        Ok(())
    }

    async fn save_session(&self) -> Result<()> {
        let mut state = self.begin(HostOp::SaveSession)?;
        let Some(key) = state.active.as_ref().and_then(HostIdentity::chat_key) else {
            return Err(anyhow!("no active session to save"));
        };
        let saved = SavedSession {
            chat: state.chat.as_ref().clone(),
            metadata: state.metadata.as_ref().clone(),
        };
        state.saved.insert(key.to_string(), saved);
        Ok(())
    }

    async fn announce_session_changed(&self) -> Result<()> {
        let mut state = self.begin(HostOp::AnnounceSessionChanged)?;
        state.announcements += 1;
        Ok(())
    }
}
