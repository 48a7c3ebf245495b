//! Restore state machine
//!
//! Replays a stored [`Snapshot`] into a fresh host session:
//!
//! ```text
//! Idle -> EntitySelected -> NewSessionCreated -> ContextVerified
//!      -> ContentInjected -> Persisted -> Done
//! ```
//!
//! Any step may move the machine to `Failed`. Nothing is written into a live
//! session until the host confirms the new session belongs to the snapshot's
//! entity. Content only ever goes into the session the machine created, so
//! a failure while injecting or persisting quarantines that session by
//! clearing it and leaves every earlier session intact.

use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use thiserror::Error;

use crate::chat::ChatKey;
use crate::copy::CopyPipeline;
use crate::error::{ChatkeepError, Result};
use crate::host::{HostIdentity, HostSession};
use crate::storage::Snapshot;

/// Restore progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Idle,
    EntitySelected,
    NewSessionCreated,
    ContextVerified,
    ContentInjected,
    Persisted,
    Done,
    Failed,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreState::Idle => "idle",
            RestoreState::EntitySelected => "entity_selected",
            RestoreState::NewSessionCreated => "new_session_created",
            RestoreState::ContextVerified => "context_verified",
            RestoreState::ContentInjected => "content_injected",
            RestoreState::Persisted => "persisted",
            RestoreState::Done => "done",
            RestoreState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A restore that stopped before `Done`
///
/// `stage` is the transition that failed, named by its target state.
#[derive(Debug, Error)]
#[error("restore failed at {stage}: {error:#}")]
pub struct RestoreFailure {
    /// Transition that failed
    pub stage: RestoreState,
    /// Originating error
    pub error: anyhow::Error,
}

impl RestoreFailure {
    /// Classified cause, if it is a [`ChatkeepError`]
    pub fn kind(&self) -> Option<&ChatkeepError> {
        self.error.downcast_ref::<ChatkeepError>()
    }
}

/// A completed restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Chat key of the restored snapshot
    pub chat_key: String,
    /// Session that now holds the content
    pub session: HostIdentity,
    /// Messages written
    pub message_count: usize,
}

/// Drives one restore against a host
pub struct RestoreMachine<'a> {
    host: &'a dyn HostSession,
    pipeline: CopyPipeline,
    state: RestoreState,
}

impl<'a> RestoreMachine<'a> {
    /// Machine in `Idle` using the default copy pipeline
    pub fn new(host: &'a dyn HostSession) -> Self {
        Self::with_pipeline(host, CopyPipeline::default())
    }

    /// Machine using a custom copy pipeline for the injected content
    pub fn with_pipeline(host: &'a dyn HostSession, pipeline: CopyPipeline) -> Self {
        Self {
            host,
            pipeline,
            state: RestoreState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> RestoreState {
        self.state
    }

    /// Run every transition; at most once per machine
    pub async fn run(
        mut self,
        snapshot: &Snapshot,
    ) -> std::result::Result<RestoreReport, RestoreFailure> {
        if self.state != RestoreState::Idle {
            return Err(RestoreFailure {
                stage: self.state,
                error: anyhow::anyhow!("restore machine already used"),
            });
        }

        tracing::info!("Restoring snapshot {}", snapshot.key());

        let selected = self.select_entity(snapshot).await;
        let key = self.advance(RestoreState::EntitySelected, selected)?;

        let created = self.host.start_new_session().await;
        self.advance(RestoreState::NewSessionCreated, created)?;

        let verified = self.verify_context(&key).await;
        let session = self.advance(RestoreState::ContextVerified, verified)?;

        let injected = self.inject(snapshot).await;
        let message_count = match self.advance(RestoreState::ContentInjected, injected) {
            Ok(count) => count,
            Err(failure) => return Err(self.quarantine(failure).await),
        };

        let persisted = self.persist().await;
        if let Err(failure) = self.advance(RestoreState::Persisted, persisted) {
            return Err(self.quarantine(failure).await);
        }

        let announced = self
            .host
            .announce_session_changed()
            .await
            .context("announcing session change");
        self.advance(RestoreState::Done, announced)?;

        tracing::info!(
            "Restored {} message(s) into {}",
            message_count,
            session.session_id
        );
        Ok(RestoreReport {
            chat_key: snapshot.chat_key.clone(),
            session,
            message_count,
        })
    }

    /// Move to `target` on success, or to `Failed` keeping the error
    fn advance<T>(
        &mut self,
        target: RestoreState,
        result: Result<T>,
    ) -> std::result::Result<T, RestoreFailure> {
        match result {
            Ok(value) => {
                self.state = target;
                tracing::debug!("Restore reached {}", target);
                Ok(value)
            }
            Err(error) => {
                tracing::warn!("Restore failed moving to {}: {:#}", target, error);
                self.state = RestoreState::Failed;
                Err(RestoreFailure {
                    stage: target,
                    error,
                })
            }
        }
    }

    async fn select_entity(&self, snapshot: &Snapshot) -> Result<ChatKey> {
        let key = ChatKey::from_str(&snapshot.chat_key)?;

        if let Some(index) = key.character_index() {
            let available = self.host.character_count().await;
            if index >= available {
                return Err(ChatkeepError::RestoreMismatch(format!(
                    "character index {} out of range ({} characters)",
                    index, available
                ))
                .into());
            }
        }

        self.host
            .select_entity(key.kind, &key.entity_id)
            .await
            .map_err(|e| {
                ChatkeepError::RestoreMismatch(format!(
                    "host rejected {} '{}': {:#}",
                    key.kind, key.entity_id, e
                ))
            })?;
        Ok(key)
    }

    async fn verify_context(&self, key: &ChatKey) -> Result<HostIdentity> {
        let identity = self.host.current_identity().ok_or_else(|| {
            ChatkeepError::RestoreMismatch("no active session after creating one".to_string())
        })?;

        if !identity.is_entity(key) {
            return Err(ChatkeepError::RestoreMismatch(format!(
                "expected {} '{}', host is on {} '{}'",
                key.kind, key.entity_id, identity.kind, identity.entity_id
            ))
            .into());
        }
        Ok(identity)
    }

    async fn inject(&self, snapshot: &Snapshot) -> Result<usize> {
        let payload = self.pipeline.run(&snapshot.chat, &snapshot.metadata)?;
        let count = payload.chat.len();

        self.host
            .clear_chat()
            .await
            .map_err(injection_error("clearing live chat"))?;
        self.host
            .append_messages(payload.chat)
            .await
            .map_err(injection_error("appending messages"))?;
        if !payload.metadata.is_empty() {
            self.host
                .set_metadata(payload.metadata)
                .await
                .map_err(injection_error("applying metadata"))?;
        }
        Ok(count)
    }

    async fn persist(&self) -> Result<()> {
        self.host
            .render_chat()
            .await
            .map_err(injection_error("rendering chat"))?;
        self.host
            .scroll_to_end()
            .await
            .map_err(injection_error("scrolling chat"))?;
        self.host
            .save_session()
            .await
            .map_err(injection_error("saving session"))?;
        Ok(())
    }

    async fn quarantine(&self, failure: RestoreFailure) -> RestoreFailure {
        match self.host.clear_chat().await {
            Ok(()) => tracing::warn!("Cleared partially restored session"),
            Err(e) => tracing::error!(
                "Could not clear partially restored session, verify it manually: {:#}",
                e
            ),
        }
        failure
    }
}

fn injection_error(what: &'static str) -> impl FnOnce(anyhow::Error) -> anyhow::Error {
    move |e| ChatkeepError::RestoreInjection(format!("{}: {:#}", what, e)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatMetadata, EntityKind, Message};
    use crate::host::{FakeHost, HostOp};

    fn snapshot(chat_key: &str, messages: Vec<Message>) -> Snapshot {
        Snapshot {
            chat_key: chat_key.to_string(),
            timestamp: 1,
            entity_name: "Bob".to_string(),
            chat_name: "old".to_string(),
            last_message_id: messages.len().saturating_sub(1),
            last_message_preview: String::new(),
            chat: messages,
            metadata: ChatMetadata::new(),
        }
    }

    fn host_on_alice() -> FakeHost {
        let host = FakeHost::with_characters(&["Alice", "Bob", "Carol"]);
        host.open_character_chat(0, "current", vec![Message::user("keep me")]);
        host
    }

    #[tokio::test]
    async fn test_successful_restore_reaches_done() {
        let host = host_on_alice();
        let snap = snapshot(
            "character:1:old",
            vec![Message::user("a"), Message::assistant("b")],
        );

        let report = RestoreMachine::new(&host).run(&snap).await.unwrap();

        assert_eq!(report.message_count, 2);
        assert_eq!(report.session.entity_id, "1");
        assert_eq!(host.chat(), snap.chat);
        assert_eq!(host.announcements(), 1);
        assert!(host.saved_chat(&report.session.chat_key().unwrap().to_string()).is_some());
    }

    #[tokio::test]
    async fn test_out_of_range_character_fails_before_touching_host() {
        let host = FakeHost::with_characters(&["Alice", "Bob"]);
        host.open_character_chat(0, "current", vec![Message::user("keep me")]);
        let snap = snapshot("character:2:old", vec![Message::user("a")]);

        let failure = RestoreMachine::new(&host).run(&snap).await.unwrap_err();

        assert_eq!(failure.stage, RestoreState::EntitySelected);
        assert!(matches!(failure.kind(), Some(ChatkeepError::RestoreMismatch(_))));
        assert_eq!(host.chat(), vec![Message::user("keep me")]);
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_key_fails_at_entity_selection() {
        let host = host_on_alice();
        let snap = snapshot("bogus", vec![Message::user("a")]);
        let failure = RestoreMachine::new(&host).run(&snap).await.unwrap_err();
        assert_eq!(failure.stage, RestoreState::EntitySelected);
        assert!(matches!(failure.kind(), Some(ChatkeepError::InvalidChatKey(_))));
    }

    #[tokio::test]
    async fn test_identity_drift_stops_before_injection() {
        let host = host_on_alice();
        host.drift_on_new_session(HostIdentity {
            kind: EntityKind::Character,
            entity_id: "2".to_string(),
            session_id: "elsewhere".to_string(),
            entity_name: "Carol".to_string(),
            chat_name: "elsewhere".to_string(),
        });
        let snap = snapshot("character:1:old", vec![Message::user("a")]);

        let failure = RestoreMachine::new(&host).run(&snap).await.unwrap_err();

        assert_eq!(failure.stage, RestoreState::ContextVerified);
        assert!(!host.calls().contains(&HostOp::AppendMessages));
    }

    #[tokio::test]
    async fn test_save_failure_quarantines_new_session() {
        let host = host_on_alice();
        host.fail_on(HostOp::SaveSession);
        let snap = snapshot("character:1:old", vec![Message::user("a")]);

        let failure = RestoreMachine::new(&host).run(&snap).await.unwrap_err();

        assert_eq!(failure.stage, RestoreState::Persisted);
        assert!(matches!(failure.kind(), Some(ChatkeepError::RestoreInjection(_))));
        assert!(host.chat().is_empty());
        assert_eq!(host.announcements(), 0);
    }

    #[tokio::test]
    async fn test_metadata_is_applied_when_present() {
        let host = host_on_alice();
        let mut snap = snapshot("character:1:old", vec![Message::user("a")]);
        snap.metadata
            .insert("note".to_string(), serde_json::json!("remember"));

        RestoreMachine::new(&host).run(&snap).await.unwrap();

        assert_eq!(host.metadata().get("note"), Some(&serde_json::json!("remember")));
    }

    #[test]
    fn test_failure_display_names_stage() {
        let failure = RestoreFailure {
            stage: RestoreState::ContextVerified,
            error: ChatkeepError::RestoreMismatch("wrong chat".to_string()).into(),
        };
        assert_eq!(
            failure.to_string(),
            "restore failed at context_verified: Restore target mismatch: wrong chat"
        );
    }
}
