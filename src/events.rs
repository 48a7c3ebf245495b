//! Capture triggers and the event subscription seam
//!
//! The host raises zero-argument notifications for chat activity. Each
//! [`TriggerKind`] belongs to a [`TriggerClass`] that tells the coordinator
//! whether to capture right away or after a quiet period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Host events the coordinator listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// The user's message was appended
    MessageSent,
    /// A reply was fully appended
    MessageReceived,
    /// A generation finished
    GenerationEnded,
    /// A message was edited
    MessageEdited,
    /// A message was deleted
    MessageDeleted,
    /// An alternative reply was selected
    MessageSwiped,
    /// The active chat changed
    ChatChanged,
}

/// How a trigger is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerClass {
    /// Capture now, subject to the single-flight guard
    Immediate,
    /// Restart the debounce countdown
    Debounced,
    /// Cancel any pending countdown
    Reset,
}

impl TriggerKind {
    /// Every trigger kind, in subscription order
    pub const ALL: [TriggerKind; 7] = [
        TriggerKind::MessageSent,
        TriggerKind::MessageReceived,
        TriggerKind::GenerationEnded,
        TriggerKind::MessageEdited,
        TriggerKind::MessageDeleted,
        TriggerKind::MessageSwiped,
        TriggerKind::ChatChanged,
    ];

    /// Scheduling class of this trigger
    pub fn class(&self) -> TriggerClass {
        match self {
            TriggerKind::MessageSent | TriggerKind::MessageReceived | TriggerKind::GenerationEnded => {
                TriggerClass::Immediate
            }
            TriggerKind::MessageEdited | TriggerKind::MessageDeleted | TriggerKind::MessageSwiped => {
                TriggerClass::Debounced
            }
            TriggerKind::ChatChanged => TriggerClass::Reset,
        }
    }
}

/// Zero-argument notification handler
pub type TriggerHandler = Arc<dyn Fn() + Send + Sync + 'static>;

/// Anything that can deliver trigger notifications
pub trait EventSource {
    /// Register `handler` to run every time `kind` is raised
    fn subscribe(&self, kind: TriggerKind, handler: TriggerHandler);
}

/// Simple in-process event bus
#[derive(Default)]
pub struct LocalEventBus {
    handlers: Mutex<HashMap<TriggerKind, Vec<TriggerHandler>>>,
}

impl std::fmt::Debug for LocalEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .handlers
            .lock()
            .map(|h| h.values().map(Vec::len).sum::<usize>())
            .unwrap_or(0);
        f.debug_struct("LocalEventBus")
            .field("handlers", &count)
            .finish()
    }
}

impl LocalEventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every handler registered for `kind`; returns how many ran
    pub fn emit(&self, kind: TriggerKind) -> usize {
        // Clone the list so handlers may subscribe without deadlocking.
        let handlers: Vec<TriggerHandler> = match self.handlers.lock() {
            Ok(map) => map.get(&kind).cloned().unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().get(&kind).cloned().unwrap_or_default(),
        };
        for handler in &handlers {
            handler();
        }
        handlers.len()
    }
}

impl EventSource for LocalEventBus {
    fn subscribe(&self, kind: TriggerKind, handler: TriggerHandler) {
        let mut map = match self.handlers.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(kind).or_default().push(handler);
    }
}
