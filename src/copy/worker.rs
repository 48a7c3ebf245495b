//! Offloaded copy service
//!
//! [`CopyService`] runs a [`CopyPipeline`] on a dedicated OS thread and
//! talks to it over two [`tokio::sync::mpsc`] channels.
//!
//! - Each request carries a `u64` correlation id taken from an
//!   [`AtomicU64`]. The caller's [`oneshot`] sender is parked in a `pending`
//!   map under that id before the request is sent.
//! - A read loop task drains the response channel and resolves the matching
//!   pending sender. Responses for unknown ids (already timed out) are
//!   dropped.
//! - If the worker thread dies, its response sender is dropped and the read
//!   loop rejects every pending request with
//!   [`ChatkeepError::OffloadFault`]. The service then stays in inline mode.
//! - A timed-out request is removed from `pending` and copied inline.
//!
//! Inline and offloaded copies run the same pipeline, so results are
//! identical either way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::{CopyPayload, CopyPipeline, CopySource};
use crate::error::{ChatkeepError, Result};

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "chatkeep-copy";

/// Default time to wait for the worker before copying inline
pub const DEFAULT_OFFLOAD_TIMEOUT: Duration = Duration::from_secs(5);

type CopyOutcome = std::result::Result<CopyPayload, ChatkeepError>;

/// The pending-response map type: maps request ID to the oneshot sender.
type PendingMap = HashMap<u64, oneshot::Sender<CopyOutcome>>;

struct CopyRequest {
    id: u64,
    source: CopySource,
}

struct CopyResponse {
    id: u64,
    outcome: CopyOutcome,
}

/// Deep-copy service with an optional worker thread
pub struct CopyService {
    pipeline: Arc<CopyPipeline>,
    /// Monotonically increasing request ID counter.
    next_id: AtomicU64,
    /// In-flight requests waiting for a response.
    pending: Arc<Mutex<PendingMap>>,
    /// `None` when the worker could not be started.
    request_tx: Option<mpsc::UnboundedSender<CopyRequest>>,
    offload_available: Arc<AtomicBool>,
    timeout: Duration,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for CopyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyService")
            .field("pipeline", &self.pipeline)
            .field("offload_available", &self.is_offload_available())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CopyService {
    /// Start a service with a worker thread
    ///
    /// Must be called from within a Tokio runtime. If the thread cannot be
    /// spawned the service is returned in inline mode.
    pub fn start(pipeline: CopyPipeline, timeout: Duration) -> Self {
        let pipeline = Arc::new(pipeline);
        let pending = Arc::new(Mutex::new(PendingMap::new()));
        let offload_available = Arc::new(AtomicBool::new(false));
        let cancellation = CancellationToken::new();

        let (request_tx, request_rx) = mpsc::unbounded_channel::<CopyRequest>();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<CopyResponse>();

        let worker_pipeline = Arc::clone(&pipeline);
        let spawned = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(worker_pipeline, request_rx, response_tx));

        let request_tx = match spawned {
            Ok(_) => {
                offload_available.store(true, Ordering::SeqCst);
                start_read_loop(
                    response_rx,
                    cancellation.clone(),
                    Arc::clone(&pending),
                    Arc::clone(&offload_available),
                );
                tracing::debug!("Copy worker started");
                Some(request_tx)
            }
            Err(e) => {
                tracing::warn!("Could not start copy worker, copying inline: {}", e);
                None
            }
        };

        Self {
            pipeline,
            next_id: AtomicU64::new(1),
            pending,
            request_tx,
            offload_available,
            timeout,
            cancellation,
        }
    }

    /// Service that always copies on the caller's thread
    pub fn inline(pipeline: CopyPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(PendingMap::new())),
            request_tx: None,
            offload_available: Arc::new(AtomicBool::new(false)),
            timeout: DEFAULT_OFFLOAD_TIMEOUT,
            cancellation: CancellationToken::new(),
        }
    }

    /// Whether copies are currently sent to the worker
    pub fn is_offload_available(&self) -> bool {
        self.request_tx.is_some() && self.offload_available.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting a worker response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Produce an owned copy of `source`
    ///
    /// Uses the worker when available and falls back to an inline copy on a
    /// worker fault or timeout.
    ///
    /// # Errors
    ///
    /// Returns `ChatkeepError::CopyFailed` when every strategy fails.
    pub async fn copy(&self, source: &CopySource) -> Result<CopyPayload> {
        if self.is_offload_available() {
            match self.request_offloaded(source.clone()).await {
                Ok(payload) => return Ok(payload),
                Err(err) => {
                    if let Some(ChatkeepError::CopyFailed(_)) = err.downcast_ref::<ChatkeepError>()
                    {
                        return Err(err);
                    }
                    tracing::warn!("Offloaded copy failed, copying inline: {}", err);
                }
            }
        }
        self.copy_inline(source)
    }

    /// Run the pipeline on the caller's thread
    pub fn copy_inline(&self, source: &CopySource) -> Result<CopyPayload> {
        Ok(self.pipeline.run(&source.chat, &source.metadata)?)
    }

    /// Send one request to the worker and await its correlated response
    ///
    /// # Errors
    ///
    /// - `ChatkeepError::OffloadFault` if there is no worker or it died.
    /// - `ChatkeepError::OffloadTimeout` if no response arrives in time.
    /// - `ChatkeepError::CopyFailed` if the worker ran the pipeline and every
    ///   strategy failed.
    pub async fn request_offloaded(&self, source: CopySource) -> Result<CopyPayload> {
        let Some(request_tx) = &self.request_tx else {
            return Err(ChatkeepError::OffloadFault("no copy worker".to_string()).into());
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so the response can never arrive first.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if request_tx.send(CopyRequest { id, source }).is_err() {
            self.pending.lock().await.remove(&id);
            self.offload_available.store(false, Ordering::SeqCst);
            return Err(ChatkeepError::OffloadFault("copy worker channel closed".to_string()).into());
        }

        let outcome = match tokio::time::timeout(self.timeout, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ChatkeepError::OffloadTimeout {
                    id,
                    timeout_ms: self.timeout.as_millis() as u64,
                }
                .into());
            }
        };

        // The sender was dropped without an answer.
        let outcome = outcome.map_err(|_| {
            ChatkeepError::OffloadFault("copy response dropped".to_string())
        })?;

        Ok(outcome?)
    }

    /// Stop the read loop and reject anything still pending
    ///
    /// Later copies run inline. The worker thread exits once the service is
    /// dropped.
    pub fn shutdown(&self) {
        self.offload_available.store(false, Ordering::SeqCst);
        self.cancellation.cancel();
    }
}

impl Drop for CopyService {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

fn run_worker(
    pipeline: Arc<CopyPipeline>,
    mut request_rx: mpsc::UnboundedReceiver<CopyRequest>,
    response_tx: mpsc::UnboundedSender<CopyResponse>,
) {
    while let Some(CopyRequest { id, source }) = request_rx.blocking_recv() {
        let outcome = pipeline.run(&source.chat, &source.metadata);
        drop(source);
        if response_tx.send(CopyResponse { id, outcome }).is_err() {
            break;
        }
    }
    tracing::debug!("Copy worker exiting");
}

fn start_read_loop(
    mut response_rx: mpsc::UnboundedReceiver<CopyResponse>,
    cancellation: CancellationToken,
    pending: Arc<Mutex<PendingMap>>,
    offload_available: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    offload_available.store(false, Ordering::SeqCst);
                    reject_all(&pending, "copy service shut down").await;
                    break;
                }

                maybe_response = response_rx.recv() => {
                    let Some(CopyResponse { id, outcome }) = maybe_response else {
                        // Worker thread is gone (panicked or exited).
                        offload_available.store(false, Ordering::SeqCst);
                        tracing::error!("Copy worker stopped; copies will run inline");
                        reject_all(&pending, "copy worker exited").await;
                        break;
                    };

                    let tx = pending.lock().await.remove(&id);
                    match tx {
                        // Ignore send errors: the caller may have already timed out.
                        Some(tx) => {
                            let _ = tx.send(outcome);
                        }
                        None => tracing::debug!("Copy response for unknown id {}; ignoring", id),
                    }
                }
            }
        }
    })
}

async fn reject_all(pending: &Mutex<PendingMap>, reason: &str) {
    let drained: Vec<_> = pending.lock().await.drain().collect();
    if !drained.is_empty() {
        tracing::warn!("Rejecting {} pending copy request(s): {}", drained.len(), reason);
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(ChatkeepError::OffloadFault(reason.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatMetadata, Message};
    use crate::copy::{CopyStrategy, JsonRoundTrip, StructuralClone};

    fn on_worker() -> bool {
        std::thread::current().name() == Some(WORKER_THREAD_NAME)
    }

    /// Panics when run on the worker thread, clones otherwise.
    struct PanicsOnWorker;

    impl CopyStrategy for PanicsOnWorker {
        fn name(&self) -> &'static str {
            "panics_on_worker"
        }

        fn copy(&self, chat: &[Message], metadata: &ChatMetadata) -> Result<CopyPayload> {
            if on_worker() {
                panic!("simulated worker crash");
            }
            StructuralClone.copy(chat, metadata)
        }
    }

    /// Sleeps when run on the worker thread, clones otherwise.
    struct SlowOnWorker(Duration);

    impl CopyStrategy for SlowOnWorker {
        fn name(&self) -> &'static str {
            "slow_on_worker"
        }

        fn copy(&self, chat: &[Message], metadata: &ChatMetadata) -> Result<CopyPayload> {
            if on_worker() {
                std::thread::sleep(self.0);
            }
            StructuralClone.copy(chat, metadata)
        }
    }

    struct AlwaysFails;

    impl CopyStrategy for AlwaysFails {
        fn name(&self) -> &'static str {
            "always_fails"
        }

        fn copy(&self, _chat: &[Message], _metadata: &ChatMetadata) -> Result<CopyPayload> {
            Err(anyhow::anyhow!("nope"))
        }
    }

    fn source(n: usize) -> CopySource {
        CopySource::new(
            (0..n).map(|i| Message::user(format!("m{}", i))).collect(),
            ChatMetadata::new(),
        )
    }

    #[tokio::test]
    async fn test_offloaded_copy_matches_source() {
        let service = CopyService::start(CopyPipeline::default(), Duration::from_secs(5));
        assert!(service.is_offload_available());

        let src = source(50);
        let copy = service.request_offloaded(src.clone()).await.unwrap();
        assert_eq!(copy.chat, *src.chat);
        assert_ne!(copy.chat.as_ptr(), src.chat.as_ptr());
        assert_eq!(service.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_resolved_by_id() {
        let service = CopyService::start(CopyPipeline::default(), Duration::from_secs(5));

        let (a, b, c) = tokio::join!(
            service.request_offloaded(source(1)),
            service.request_offloaded(source(2)),
            service.request_offloaded(source(3)),
        );

        assert_eq!(a.unwrap().chat.len(), 1);
        assert_eq!(b.unwrap().chat.len(), 2);
        assert_eq!(c.unwrap().chat.len(), 3);
    }

    #[tokio::test]
    async fn test_worker_crash_rejects_all_pending() {
        let service = CopyService::start(
            CopyPipeline::new(vec![Box::new(PanicsOnWorker)]),
            Duration::from_secs(5),
        );

        let (a, b) = tokio::join!(
            service.request_offloaded(source(1)),
            service.request_offloaded(source(2)),
        );

        for result in [a, b] {
            let err = result.unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<ChatkeepError>(),
                    Some(ChatkeepError::OffloadFault(_))
                ),
                "unexpected error: {err}"
            );
        }
        assert_eq!(service.pending_count().await, 0);
        assert!(!service.is_offload_available());

        // Later copies fall back to the caller's thread.
        let copy = service.copy(&source(4)).await.unwrap();
        assert_eq!(copy.chat.len(), 4);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_inline() {
        let service = CopyService::start(
            CopyPipeline::new(vec![Box::new(SlowOnWorker(Duration::from_millis(300)))]),
            Duration::from_millis(20),
        );

        let err = service.request_offloaded(source(1)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatkeepError>(),
            Some(ChatkeepError::OffloadTimeout { .. })
        ));
        assert_eq!(service.pending_count().await, 0);

        let copy = service.copy(&source(2)).await.unwrap();
        assert_eq!(copy.chat.len(), 2);
    }

    #[tokio::test]
    async fn test_copy_failure_from_worker_is_final() {
        let service = CopyService::start(
            CopyPipeline::new(vec![Box::new(AlwaysFails), Box::new(AlwaysFails)]),
            Duration::from_secs(5),
        );

        let err = service.copy(&source(1)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatkeepError>(),
            Some(ChatkeepError::CopyFailed(_))
        ));
        assert!(service.is_offload_available());
    }

    #[tokio::test]
    async fn test_fallback_strategy_on_worker() {
        let service = CopyService::start(
            CopyPipeline::new(vec![Box::new(AlwaysFails), Box::new(JsonRoundTrip)]),
            Duration::from_secs(5),
        );

        let src = source(3);
        let copy = service.copy(&src).await.unwrap();
        assert_eq!(copy.chat, *src.chat);
        assert_ne!(copy.chat.as_ptr(), src.chat.as_ptr());
    }

    #[tokio::test]
    async fn test_shutdown_switches_to_inline() {
        let service = CopyService::start(CopyPipeline::default(), Duration::from_secs(5));
        service.shutdown();
        assert!(!service.is_offload_available());
        assert_eq!(service.copy(&source(2)).await.unwrap().chat.len(), 2);
    }

    #[test]
    fn test_inline_service_has_no_worker() {
        let service = CopyService::inline(CopyPipeline::default());
        assert!(!service.is_offload_available());
        assert_eq!(service.copy_inline(&source(2)).unwrap().chat.len(), 2);
    }
}
