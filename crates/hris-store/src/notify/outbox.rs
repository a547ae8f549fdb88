//! # Notification Outbox
//!
//! Bounded queue plus a background worker that delivers notifications.
//!
//! ## Dispatcher Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Notification Dispatcher Flow                         │
//! │                                                                         │
//! │  NotificationQueue (cloned into every store)                           │
//! │       │  enqueue(job) → try_send                                       │
//! │       │    full / closed → warn!, job dropped, stats.dropped += 1      │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              mpsc channel (queue_capacity)                      │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               ▼                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 NotificationDispatcher::run                     │   │
//! │  │                                                                 │   │
//! │  │  1. Resolve audience through the RecipientDirectory            │   │
//! │  │  2. Deduplicate; no recipients → skipped                       │   │
//! │  │  3. NotificationSink::create_notification(payload)             │   │
//! │  │  4. Retryable failure → sleep (exponential backoff), go to 1   │   │
//! │  │  5. max_attempts reached or permanent error → error!, dropped  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  TIMING:                                                               │
//! │  • Initial backoff: 200 ms, doubling, capped at 10 s (configurable)    │
//! │  • Max attempts: 5 (configurable)                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{resolve_recipients, NotificationJob, NotificationSink, RecipientDirectory};
use crate::error::{StoreError, StoreResult};

// =============================================================================
// Settings
// =============================================================================

/// Queue and retry policy of the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Jobs buffered before `enqueue` starts dropping.
    pub queue_capacity: usize,

    /// Delivery attempts per job, including the first.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    pub initial_backoff: Duration,

    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchSettings {
            queue_capacity: 256,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Running counters shared by the queue handles and the worker.
#[derive(Debug, Default)]
pub struct DispatchStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    pub enqueued: u64,
    /// Sent to the sink.
    pub delivered: u64,
    /// Resolved to nobody.
    pub skipped: u64,
    /// Gave up after retries or a permanent error.
    pub failed: u64,
    /// Refused at enqueue (queue full or worker stopped).
    pub dropped: u64,
    /// Queued but still waiting when the worker shut down.
    pub abandoned: u64,
}

impl DispatchSnapshot {
    /// Jobs accepted but not finished yet.
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.delivered + self.skipped + self.failed + self.abandoned)
    }
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

// =============================================================================
// Queue Handle
// =============================================================================

/// Handle for enqueuing jobs and stopping the dispatcher.
#[derive(Clone)]
pub struct NotificationQueue {
    job_tx: mpsc::Sender<NotificationJob>,
    shutdown_tx: mpsc::Sender<()>,
    stats: Arc<DispatchStats>,
}

impl NotificationQueue {
    /// Queues a job without waiting.
    ///
    /// A full or closed queue drops the job; the error is for logging only.
    pub fn enqueue(&self, job: NotificationJob) -> StoreResult<()> {
        match self.job_tx.try_send(job) {
            Ok(()) => {
                DispatchStats::bump(&self.stats.enqueued, 1);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                DispatchStats::bump(&self.stats.dropped, 1);
                Err(StoreError::ChannelError(format!(
                    "notification queue full, dropped {} {} job",
                    job.source, job.row_id
                )))
            }
            Err(TrySendError::Closed(job)) => {
                DispatchStats::bump(&self.stats.dropped, 1);
                Err(StoreError::ChannelError(format!(
                    "notification dispatcher stopped, dropped {} {} job",
                    job.source, job.row_id
                )))
            }
        }
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> StoreResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| StoreError::ChannelError("Shutdown channel closed".into()))
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }

    /// True once the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.job_tx.is_closed()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Background worker delivering queued notifications.
pub struct NotificationDispatcher {
    directory: Arc<dyn RecipientDirectory>,
    sink: Arc<dyn NotificationSink>,
    settings: DispatchSettings,
    stats: Arc<DispatchStats>,
    job_rx: mpsc::Receiver<NotificationJob>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher and returns it with its queue handle.
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        sink: Arc<dyn NotificationSink>,
        settings: DispatchSettings,
    ) -> (Self, NotificationQueue) {
        let (job_tx, job_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let stats = Arc::new(DispatchStats::default());

        let dispatcher = NotificationDispatcher {
            directory,
            sink,
            settings,
            stats: stats.clone(),
            job_rx,
            shutdown_rx,
        };
        let queue = NotificationQueue {
            job_tx,
            shutdown_tx,
            stats,
        };

        (dispatcher, queue)
    }

    /// Creates a dispatcher and spawns it on the current runtime.
    pub fn spawn(
        directory: Arc<dyn RecipientDirectory>,
        sink: Arc<dyn NotificationSink>,
        settings: DispatchSettings,
    ) -> (NotificationQueue, JoinHandle<()>) {
        let (dispatcher, queue) = Self::new(directory, sink, settings);
        let handle = tokio::spawn(dispatcher.run());
        (queue, handle)
    }

    /// Runs the dispatch loop until shutdown or until every queue handle is
    /// dropped.
    pub async fn run(mut self) {
        info!(
            capacity = self.settings.queue_capacity,
            max_attempts = self.settings.max_attempts,
            "Notification dispatcher starting"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("Notification dispatcher shutting down");
                    break;
                }

                job = self.job_rx.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                },
            }
        }

        self.job_rx.close();
        let mut abandoned = 0;
        while self.job_rx.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!(abandoned, "Dropping queued notifications at shutdown");
            DispatchStats::bump(&self.stats.abandoned, abandoned);
        }

        info!("Notification dispatcher stopped");
    }

    /// Delivers one job, retrying per the settings.
    async fn process(&self, job: NotificationJob) {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.deliver(&job).await {
                Ok(0) => {
                    debug!(source = %job.source, row_id = %job.row_id, "No recipients, notification skipped");
                    DispatchStats::bump(&self.stats.skipped, 1);
                    return;
                }
                Ok(recipients) => {
                    info!(
                        source = %job.source,
                        row_id = %job.row_id,
                        recipients,
                        attempts = attempt,
                        "Notification delivered"
                    );
                    DispatchStats::bump(&self.stats.delivered, 1);
                    return;
                }
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = backoff.next_backoff().unwrap_or(self.settings.max_backoff);
                    warn!(
                        source = %job.source,
                        row_id = %job.row_id,
                        attempt,
                        ?delay,
                        error = %e,
                        "Notification delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        source = %job.source,
                        row_id = %job.row_id,
                        company_id = job.company_id,
                        attempts = attempt,
                        error = %e,
                        "Giving up on notification"
                    );
                    DispatchStats::bump(&self.stats.failed, 1);
                    return;
                }
            }
        }
    }

    /// One attempt. Returns how many recipients were notified.
    async fn deliver(&self, job: &NotificationJob) -> StoreResult<usize> {
        let recipients =
            resolve_recipients(self.directory.as_ref(), job.company_id, &job.draft.audience)
                .await?;
        let payload = job.draft.clone().into_payload(job.company_id, recipients);
        if payload.recipient_id.is_empty() {
            return Ok(0);
        }

        self.sink.create_notification(&payload).await?;
        Ok(payload.recipient_id.len())
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.settings.initial_backoff,
            initial_interval: self.settings.initial_backoff,
            max_interval: self.settings.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // bounded by max_attempts instead
            ..Default::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
