//! Deep copies of chat payloads
//!
//! A snapshot must never share memory with the live session it was taken
//! from. The host hands out its log as an [`Arc`] (copy-on-write on the host
//! side), and this module turns that shared view into an owned
//! [`CopyPayload`].
//!
//! Copying is a pipeline of [`CopyStrategy`] implementations tried in order:
//! [`StructuralClone`] first, then [`JsonRoundTrip`]. If every strategy
//! fails the copy fails with [`ChatkeepError::CopyFailed`]; a partial or
//! aliased payload is never returned.
//!
//! [`CopyService`] runs the pipeline on a dedicated worker thread so large
//! chats do not block the async runtime.

use crate::chat::{ChatMetadata, Message};
use crate::error::{ChatkeepError, Result};
use std::sync::Arc;

pub mod worker;

pub use worker::{CopyService, WORKER_THREAD_NAME};

/// Shared, read-only view of a live chat handed out by the host
#[derive(Debug, Clone, Default)]
pub struct CopySource {
    /// Live message list
    pub chat: Arc<Vec<Message>>,
    /// Live session metadata
    pub metadata: Arc<ChatMetadata>,
}

impl CopySource {
    /// Wrap owned values into a source
    pub fn new(chat: Vec<Message>, metadata: ChatMetadata) -> Self {
        Self {
            chat: Arc::new(chat),
            metadata: Arc::new(metadata),
        }
    }
}

/// Independently owned copy of a chat and its metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CopyPayload {
    /// Copied message list
    pub chat: Vec<Message>,
    /// Copied metadata
    pub metadata: ChatMetadata,
}

/// One way of producing an owned copy
pub trait CopyStrategy: Send + Sync {
    /// Short name used in logs and failure reports
    fn name(&self) -> &'static str;

    /// Produce a copy that shares nothing with the inputs
    fn copy(&self, chat: &[Message], metadata: &ChatMetadata) -> Result<CopyPayload>;
}

/// Field-by-field clone
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralClone;

impl CopyStrategy for StructuralClone {
    fn name(&self) -> &'static str {
        "structural_clone"
    }

    fn copy(&self, chat: &[Message], metadata: &ChatMetadata) -> Result<CopyPayload> {
        Ok(CopyPayload {
            chat: chat.to_vec(),
            metadata: metadata.clone(),
        })
    }
}

/// Serialize to JSON and parse back
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRoundTrip;

impl CopyStrategy for JsonRoundTrip {
    fn name(&self) -> &'static str {
        "json_round_trip"
    }

    fn copy(&self, chat: &[Message], metadata: &ChatMetadata) -> Result<CopyPayload> {
        let chat_bytes = serde_json::to_vec(chat)?;
        let metadata_bytes = serde_json::to_vec(metadata)?;
        Ok(CopyPayload {
            chat: serde_json::from_slice(&chat_bytes)?,
            metadata: serde_json::from_slice(&metadata_bytes)?,
        })
    }
}

/// Ordered list of copy strategies
pub struct CopyPipeline {
    strategies: Vec<Box<dyn CopyStrategy>>,
}

impl std::fmt::Debug for CopyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyPipeline")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for CopyPipeline {
    fn default() -> Self {
        Self::new(vec![Box::new(StructuralClone), Box::new(JsonRoundTrip)])
    }
}

impl CopyPipeline {
    /// Pipeline trying `strategies` in order
    pub fn new(strategies: Vec<Box<dyn CopyStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names of the configured strategies, in order
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Copy with the first strategy that succeeds
    ///
    /// # Errors
    ///
    /// Returns `ChatkeepError::CopyFailed` listing every attempt when no
    /// strategy succeeds (including an empty pipeline).
    pub fn run(
        &self,
        chat: &[Message],
        metadata: &ChatMetadata,
    ) -> std::result::Result<CopyPayload, ChatkeepError> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.copy(chat, metadata) {
                Ok(payload) => {
                    if !failures.is_empty() {
                        tracing::debug!(
                            "Copy succeeded with {} after {} failure(s)",
                            strategy.name(),
                            failures.len()
                        );
                    }
                    return Ok(payload);
                }
                Err(e) => {
                    tracing::warn!("Copy strategy {} failed: {}", strategy.name(), e);
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no copy strategies configured".to_string());
        }
        Err(ChatkeepError::CopyFailed(failures.join("; ")))
    }
}
