//! Backup coordinator
//!
//! [`BackupCoordinator`] owns every piece of process-wide capture state: the
//! single-flight flag, the pending debounce timer, and the collaborators a
//! capture needs. It turns host triggers into capture runs and exposes the
//! operations a UI layer calls (manual capture, listing, restore, delete).
//!
//! Immediate triggers claim the single-flight flag synchronously, inside the
//! handler, so two triggers raised back to back never start two captures.
//! Debounced triggers remember the chat they fired for and restart a
//! countdown; when it elapses on a different chat the capture is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::capture::{capture, CaptureDeps, CaptureOutcome, RetentionPolicy, SkipReason};
use crate::chat::ChatKey;
use crate::clock::{Clock, SystemClock};
use crate::config::BackupConfig;
use crate::copy::CopyService;
use crate::error::{ChatkeepError, Result};
use crate::events::{EventSource, TriggerClass, TriggerKind};
use crate::host::{HostSession, Notifier, TracingNotifier};
use crate::restore::{RestoreFailure, RestoreMachine, RestoreReport, RestoreState};
use crate::storage::{Snapshot, SnapshotStore};

/// Holds the single-flight flag; releases it when dropped
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for InFlightGuard {
    /// Releases the flag on every exit path, including panics
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Schedules captures and serves UI-facing backup operations
pub struct BackupCoordinator {
    deps: CaptureDeps,
    notifier: Arc<dyn Notifier>,
    debounce_delay: Duration,
    in_flight: Arc<AtomicBool>,
    debounce: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for BackupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCoordinator")
            .field("policy", &self.deps.policy)
            .field("debounce_delay", &self.debounce_delay)
            .field("in_flight", &self.is_capture_in_flight())
            .finish()
    }
}

impl BackupCoordinator {
    /// Create a coordinator with a tracing-only notifier and the system clock
    ///
    /// # Arguments
    ///
    /// * `config` - Backup settings (cap, debounce delay, preview length)
    /// * `store` - Snapshot store
    /// * `host` - Live session provider
    /// * `copier` - Deep-copy service
    pub fn new(
        config: &BackupConfig,
        store: Arc<dyn SnapshotStore>,
        host: Arc<dyn HostSession>,
        copier: Arc<CopyService>,
    ) -> Self {
        Self {
            deps: CaptureDeps {
                host,
                store,
                copier,
                clock: SystemClock::shared(),
                policy: RetentionPolicy::from(config),
            },
            notifier: Arc::new(TracingNotifier),
            debounce_delay: config.debounce_delay(),
            in_flight: Arc::new(AtomicBool::new(false)),
            debounce: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.deps.clock = clock;
        self
    }

    /// Active retention limits
    pub fn policy(&self) -> RetentionPolicy {
        self.deps.policy
    }

    /// Whether a capture currently holds the single-flight flag
    pub fn is_capture_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether a debounce countdown is waiting to fire
    pub fn has_pending_debounce(&self) -> bool {
        self.debounce_slot()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Subscribe to every trigger kind on `source`
    ///
    /// Handlers hold a weak reference, so registering does not keep the
    /// coordinator alive.
    pub fn register(self: &Arc<Self>, source: &dyn EventSource) {
        for kind in TriggerKind::ALL {
            let weak: Weak<Self> = Arc::downgrade(self);
            source.subscribe(
                kind,
                Arc::new(move || {
                    if let Some(coordinator) = weak.upgrade() {
                        coordinator.handle_trigger(kind);
                    }
                }),
            );
        }
        tracing::debug!("Registered backup triggers");
    }

    /// React to one host trigger
    ///
    /// Must be called from within a tokio runtime; outside one the trigger is
    /// dropped with a warning.
    pub fn handle_trigger(self: &Arc<Self>, kind: TriggerKind) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("Dropping {:?} trigger: no async runtime", kind);
            return;
        }

        match kind.class() {
            TriggerClass::Immediate => self.trigger_immediate(kind),
            TriggerClass::Debounced => self.schedule_debounced(kind),
            TriggerClass::Reset => {
                if self.cancel_debounce() {
                    tracing::debug!("Chat changed, pending backup cancelled");
                }
            }
        }
    }

    fn trigger_immediate(self: &Arc<Self>, kind: TriggerKind) {
        let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("Dropping {:?} trigger: backup already running", kind);
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.run_guarded(guard).await;
        });
    }

    fn schedule_debounced(self: &Arc<Self>, kind: TriggerKind) {
        let scheduled_for = self.active_chat_key();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let delay = self.debounce_delay;
        let this = Arc::clone(self);

        let mut slot = self.debounce_slot();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire_debounced(kind, generation, scheduled_for).await;
        }));
        tracing::debug!("Backup scheduled in {:?} after {:?}", delay, kind);
    }

    async fn fire_debounced(
        self: Arc<Self>,
        kind: TriggerKind,
        generation: u64,
        scheduled_for: Option<ChatKey>,
    ) {
        {
            let mut slot = self.debounce_slot();
            if self.generation.load(Ordering::Acquire) != generation {
                return;
            }
            // Detach so a later trigger cannot abort the capture itself.
            slot.take();
        }

        let current = self.active_chat_key();
        if current != scheduled_for {
            tracing::debug!(
                "Discarding {:?} backup: chat changed from {:?} to {:?}",
                kind,
                scheduled_for.map(|k| k.to_string()),
                current.map(|k| k.to_string())
            );
            return;
        }

        let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("Dropping debounced backup: backup already running");
            return;
        };
        let _ = self.run_guarded(guard).await;
    }

    /// Run a capture holding `guard`, then report
    ///
    /// The guard and any pending debounce are released before a failure is
    /// reported.
    async fn run_guarded(&self, guard: InFlightGuard) -> Result<CaptureOutcome> {
        let result = capture(&self.deps.context()).await;
        drop(guard);

        match &result {
            Ok(CaptureOutcome::Saved { key, evicted, .. }) => {
                tracing::debug!("Backup {} saved, {} evicted", key, evicted.len());
                self.notifier.backups_changed();
            }
            Ok(CaptureOutcome::Skipped(reason)) => {
                tracing::debug!("Backup skipped: {}", reason);
            }
            Err(e) => {
                self.cancel_debounce();
                tracing::error!("Backup failed: {:#}", e);
                self.notifier
                    .report_failure(&format!("Backup failed: {:#}", e));
            }
        }
        result
    }

    /// Capture the active chat now
    ///
    /// Returns `Skipped(Busy)` when another capture is running.
    pub async fn manual_capture(&self) -> Result<CaptureOutcome> {
        let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Ok(CaptureOutcome::Skipped(SkipReason::Busy));
        };
        let outcome = self.run_guarded(guard).await?;
        match &outcome {
            CaptureOutcome::Saved { key, .. } => self
                .notifier
                .report_success(&format!("Backup saved: {}", key)),
            CaptureOutcome::Skipped(reason) => self
                .notifier
                .report_success(&format!("Nothing to back up: {}", reason)),
        }
        Ok(outcome)
    }

    /// Every stored snapshot, newest first
    pub async fn list_all(&self) -> Result<Vec<Snapshot>> {
        match self.deps.store.get_all().await {
            Ok(mut snapshots) => {
                sort_newest_first(&mut snapshots);
                Ok(snapshots)
            }
            Err(e) => {
                self.notifier
                    .report_failure(&format!("Could not list backups: {:#}", e));
                Err(e)
            }
        }
    }

    /// Replay a stored snapshot into a new host session
    ///
    /// Any pending debounce is cancelled first. Restore holds the
    /// single-flight flag until it finishes, so no capture can read the
    /// session while it is half written; if a capture is already running the
    /// restore fails at [`RestoreState::Idle`] with [`ChatkeepError::Busy`].
    /// A snapshot that cannot be loaded also fails at `Idle`.
    pub async fn restore(
        &self,
        chat_key: &str,
        timestamp: i64,
    ) -> std::result::Result<RestoreReport, RestoreFailure> {
        self.cancel_debounce();

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            let failure = RestoreFailure {
                stage: RestoreState::Idle,
                error: ChatkeepError::Busy.into(),
            };
            self.notifier.report_failure(&failure.to_string());
            return Err(failure);
        };

        let result = match self.load_snapshot(chat_key, timestamp).await {
            Ok(snapshot) => {
                RestoreMachine::new(self.deps.host.as_ref())
                    .run(&snapshot)
                    .await
            }
            Err(error) => Err(RestoreFailure {
                stage: RestoreState::Idle,
                error,
            }),
        };

        match &result {
            Ok(report) => self.notifier.report_success(&format!(
                "Restored {} message(s) into {}",
                report.message_count, report.session.chat_name
            )),
            Err(failure) => self.notifier.report_failure(&failure.to_string()),
        }
        result
    }

    async fn load_snapshot(&self, chat_key: &str, timestamp: i64) -> Result<Snapshot> {
        self.deps
            .store
            .get(chat_key, timestamp)
            .await?
            .ok_or_else(|| {
                ChatkeepError::SnapshotNotFound {
                    chat_key: chat_key.to_string(),
                    timestamp,
                }
                .into()
            })
    }

    /// Delete one snapshot; deleting a missing one succeeds
    pub async fn delete(&self, chat_key: &str, timestamp: i64) -> Result<()> {
        match self.deps.store.delete(chat_key, timestamp).await {
            Ok(()) => {
                tracing::info!("Deleted snapshot {}@{}", chat_key, timestamp);
                self.notifier.backups_changed();
                Ok(())
            }
            Err(e) => {
                self.notifier
                    .report_failure(&format!("Could not delete backup: {:#}", e));
                Err(e)
            }
        }
    }

    /// Cancel any pending debounce and stop the copy worker
    pub fn shutdown(&self) {
        self.cancel_debounce();
        self.deps.copier.shutdown();
        tracing::debug!("Backup coordinator shut down");
    }

    /// Abort the pending countdown; returns whether one was pending
    pub fn cancel_debounce(&self) -> bool {
        let mut slot = self.debounce_slot();
        self.generation.fetch_add(1, Ordering::AcqRel);
        match slot.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn active_chat_key(&self) -> Option<ChatKey> {
        self.deps
            .host
            .current_identity()
            .and_then(|identity| identity.chat_key())
    }

    fn debounce_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.debounce.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for BackupCoordinator {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.debounce.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Sort by timestamp descending, then chat key
pub fn sort_newest_first(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.chat_key.cmp(&b.chat_key))
    });
}
