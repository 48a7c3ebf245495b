//! Capture sequence body
//!
//! One capture reads the host's active chat, deep-copies it, and decides
//! whether the result is worth keeping:
//!
//! 1. No resolvable chat key or an empty chat is a no-op, as is a chat
//!    that changed while its log was being read.
//! 2. The chat and metadata are deep-copied through [`CopyService`].
//! 3. A stored snapshot of the same chat with the same `last_message_id`
//!    is superseded when it is strictly older, otherwise the candidate is
//!    skipped.
//! 4. The candidate is written, then the global retention cap is enforced
//!    by evicting the oldest snapshots across every chat.

use std::sync::Arc;

use futures::future::join_all;

use crate::clock::Clock;
use crate::config::BackupConfig;
use crate::copy::{CopyService, CopySource};
use crate::error::Result;
use crate::host::HostSession;
use crate::storage::{Snapshot, SnapshotKey, SnapshotStore};

/// Why a capture did not write anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The host has no chat with a valid key open
    NoIdentity,
    /// The active chat has no messages
    EmptyChat,
    /// A snapshot at least as new already covers this message
    Duplicate,
    /// Another capture was already running
    Busy,
    /// The active chat changed while it was being read
    ChatSwitched,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SkipReason::NoIdentity => "no active chat",
            SkipReason::EmptyChat => "chat is empty",
            SkipReason::Duplicate => "already backed up",
            SkipReason::Busy => "another backup is in progress",
            SkipReason::ChatSwitched => "chat changed during backup",
        };
        f.write_str(text)
    }
}

/// Result of one capture sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A snapshot was written
    Saved {
        /// Key of the new snapshot
        key: SnapshotKey,
        /// Older snapshot of the same message that was superseded
        replaced: Option<SnapshotKey>,
        /// Snapshots removed to honor the retention cap
        evicted: Vec<SnapshotKey>,
    },
    /// Nothing was written
    Skipped(SkipReason),
}

impl CaptureOutcome {
    /// Whether a snapshot was written
    pub fn is_saved(&self) -> bool {
        matches!(self, CaptureOutcome::Saved { .. })
    }
}

/// Limits applied by every capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Global snapshot cap, at least 1
    pub max_total_backups: usize,
    /// Preview length in characters
    pub preview_length: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&BackupConfig::default())
    }
}

impl From<&BackupConfig> for RetentionPolicy {
    fn from(config: &BackupConfig) -> Self {
        Self {
            max_total_backups: config.max_total_backups.max(1),
            preview_length: config.preview_length,
        }
    }
}

/// Collaborators one capture needs
pub struct CaptureContext<'a> {
    pub host: &'a dyn HostSession,
    pub store: &'a dyn SnapshotStore,
    pub copier: &'a CopyService,
    pub clock: &'a dyn Clock,
    pub policy: RetentionPolicy,
}

/// Run one capture sequence against the host's active chat
///
/// # Errors
///
/// Copy failures and storage failures are returned as errors. A snapshot
/// written before a failed eviction stays written; the next capture trims
/// the excess.
pub async fn capture(ctx: &CaptureContext<'_>) -> Result<CaptureOutcome> {
    let Some(identity) = ctx.host.current_identity() else {
        tracing::debug!("No active chat, skipping capture");
        return Ok(CaptureOutcome::Skipped(SkipReason::NoIdentity));
    };
    let Some(chat_key) = identity.chat_key() else {
        tracing::debug!(
            "Active chat has no usable key ({}:{}:{}), skipping capture",
            identity.kind,
            identity.entity_id,
            identity.session_id
        );
        return Ok(CaptureOutcome::Skipped(SkipReason::NoIdentity));
    };

    let source = CopySource {
        chat: ctx.host.current_chat().await,
        metadata: ctx.host.current_metadata().await,
    };

    let after_read = ctx
        .host
        .current_identity()
        .and_then(|identity| identity.chat_key());
    if after_read.as_ref() != Some(&chat_key) {
        tracing::warn!(
            "Chat changed from {} while reading, discarding capture",
            chat_key
        );
        return Ok(CaptureOutcome::Skipped(SkipReason::ChatSwitched));
    }

    if source.chat.is_empty() {
        tracing::debug!("Chat {} is empty, skipping capture", chat_key);
        return Ok(CaptureOutcome::Skipped(SkipReason::EmptyChat));
    }

    let payload = ctx.copier.copy(&source).await?;
    drop(source);

    let last_message_id = payload.chat.len() - 1;
    let preview = payload
        .chat
        .last()
        .map(|m| truncate_preview(&m.content, ctx.policy.preview_length))
        .unwrap_or_default();

    let candidate = Snapshot {
        chat_key: chat_key.to_string(),
        timestamp: ctx.clock.now_millis(),
        entity_name: identity.entity_name,
        chat_name: identity.chat_name,
        last_message_id,
        last_message_preview: preview,
        chat: payload.chat,
        metadata: payload.metadata,
    };

    let replaced = match resolve_duplicate(ctx.store, &candidate).await? {
        DuplicateCheck::Fresh => None,
        DuplicateCheck::Supersedes(key) => Some(key),
        DuplicateCheck::Covered(existing) => {
            tracing::debug!(
                "Snapshot {} already covers message {} of {}",
                existing,
                last_message_id,
                candidate.chat_key
            );
            return Ok(CaptureOutcome::Skipped(SkipReason::Duplicate));
        }
    };

    ctx.store.put(&candidate).await?;
    let key = candidate.key();
    tracing::info!(
        "Saved snapshot {} ({} messages)",
        key,
        candidate.message_count()
    );

    let evicted = enforce_retention(ctx.store, ctx.policy.max_total_backups).await?;

    Ok(CaptureOutcome::Saved {
        key,
        replaced,
        evicted,
    })
}

enum DuplicateCheck {
    Fresh,
    Supersedes(SnapshotKey),
    Covered(SnapshotKey),
}

/// Compare `candidate` against stored snapshots of the same message
///
/// Strictly older matches are deleted. A match at the same or a later
/// timestamp wins and nothing is deleted.
async fn resolve_duplicate(
    store: &dyn SnapshotStore,
    candidate: &Snapshot,
) -> Result<DuplicateCheck> {
    let matches: Vec<SnapshotKey> = store
        .get_by_chat_key(&candidate.chat_key)
        .await?
        .into_iter()
        .filter(|s| s.last_message_id == candidate.last_message_id)
        .map(|s| s.key())
        .collect();

    if let Some(newer) = matches
        .iter()
        .find(|k| k.timestamp >= candidate.timestamp)
    {
        return Ok(DuplicateCheck::Covered(newer.clone()));
    }

    let mut superseded = None;
    for key in matches {
        store.delete(&key.chat_key, key.timestamp).await?;
        tracing::debug!("Superseded snapshot {}", key);
        superseded = Some(key);
    }

    Ok(match superseded {
        Some(key) => DuplicateCheck::Supersedes(key),
        None => DuplicateCheck::Fresh,
    })
}

/// Keys to evict so at most `cap` remain: the oldest by timestamp
///
/// Ties on timestamp are broken by chat key so the choice is stable.
pub fn select_evictions(mut keys: Vec<SnapshotKey>, cap: usize) -> Vec<SnapshotKey> {
    if keys.len() <= cap {
        return Vec::new();
    }
    keys.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.chat_key.cmp(&b.chat_key))
    });
    let excess = keys.len() - cap;
    keys.truncate(excess);
    keys
}

/// Delete the globally oldest snapshots until at most `cap` remain
///
/// Deletes run concurrently. Returns the evicted keys.
pub async fn enforce_retention(
    store: &dyn SnapshotStore,
    cap: usize,
) -> Result<Vec<SnapshotKey>> {
    let keys = store.get_all_keys().await?;
    let total = keys.len();
    let evictions = select_evictions(keys, cap.max(1));
    if evictions.is_empty() {
        return Ok(evictions);
    }

    let results = join_all(
        evictions
            .iter()
            .map(|k| store.delete(&k.chat_key, k.timestamp)),
    )
    .await;
    results.into_iter().collect::<Result<Vec<()>>>()?;

    tracing::info!(
        "Evicted {} snapshot(s) to honor cap of {} ({} stored)",
        evictions.len(),
        cap,
        total
    );
    Ok(evictions)
}

/// Shorten `text` to `max_chars` characters, marking the cut with `…`
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Shared handle form of [`CaptureContext`] owned by long-lived callers
#[derive(Clone)]
pub struct CaptureDeps {
    pub host: Arc<dyn HostSession>,
    pub store: Arc<dyn SnapshotStore>,
    pub copier: Arc<CopyService>,
    pub clock: Arc<dyn Clock>,
    pub policy: RetentionPolicy,
}

impl CaptureDeps {
    /// Borrow as a [`CaptureContext`]
    pub fn context(&self) -> CaptureContext<'_> {
        CaptureContext {
            host: self.host.as_ref(),
            store: self.store.as_ref(),
            copier: self.copier.as_ref(),
            clock: self.clock.as_ref(),
            policy: self.policy,
        }
    }
}
