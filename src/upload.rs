//! Sample upload pipeline.
//!
//! Tasks wait in a delay queue until they are due and the network is up.
//! A bounded pool of tokio workers delivers them through a [`CollectorApi`],
//! and every outcome falls into one of three classes:
//!
//! - **success**: the task is done
//! - **retryable** (transport error, timeout, 5xx, 408, 429): requeued after
//!   an exponential backoff, until the [`RetryPolicy`] gives up
//! - **fatal** (any other refusal, including 401/403): discarded
//!
//! Tasks for one session are not delivered in order once retries are
//! involved; every payload carries its own window timestamp.

use crate::config::duration_ms;
use crate::core::telemetry::SensorSampleRequest;
use crate::gateway::{CollectorApi, GatewayError, SampleReceipt};
use crate::session::redact;
use crate::transparency::SharedTelemetryLog;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upload pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Number of concurrent upload workers
    pub workers: usize,
    /// Delay before the first retry
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound for any single retry delay
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Retries after the first attempt before a task is dropped
    pub max_retries: u32,
    /// Deadline for one delivery attempt
    #[serde(with = "duration_ms")]
    pub attempt_timeout: Duration,
    /// How often the CLI probes the backend for reachability
    #[serde(with = "duration_ms")]
    pub health_probe_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            max_retries: 5,
            attempt_timeout: Duration::from_secs(30),
            health_probe_interval: Duration::from_secs(15),
        }
    }
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            max_retries: self.max_retries,
        }
    }
}

/// Exponential backoff: `base_delay` doubling per failure, capped at
/// `max_delay`, for at most `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        UploadConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows the `failures`-th consecutive
    /// failure, or `None` once the task must be dropped.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures > self.max_retries {
            return None;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

/// One sample bound for the collector.
#[derive(Clone, PartialEq)]
pub struct UploadTask {
    pub request: SensorSampleRequest,
    pub bearer_token: String,
    pub session_id: String,
    /// Delivery attempts already made
    pub attempt: u32,
}

impl UploadTask {
    pub fn new(request: SensorSampleRequest, bearer_token: impl Into<String>) -> Self {
        let session_id = request.session_id.clone();
        Self {
            request,
            bearer_token: bearer_token.into(),
            session_id,
            attempt: 0,
        }
    }
}

impl std::fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTask")
            .field("session_id", &self.session_id)
            .field("timestamp", &self.request.timestamp)
            .field("bearer_token", &redact(&self.bearer_token))
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// How a delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Success,
    Retryable,
    Fatal,
}

/// Classify the result of one delivery attempt.
pub fn classify(result: &Result<SampleReceipt, GatewayError>) -> Delivery {
    match result {
        Ok(_) => Delivery::Success,
        Err(e) if e.is_retryable() => Delivery::Retryable,
        Err(_) => Delivery::Fatal,
    }
}

/// Published for every attempt the pipeline settles.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Delivered {
        session_id: String,
        timestamp: String,
        sample_id: Option<String>,
    },
    Retrying {
        session_id: String,
        timestamp: String,
        attempt: u32,
        delay: Duration,
    },
    /// Dropped after the retry policy gave up.
    Exhausted {
        session_id: String,
        timestamp: String,
        attempts: u32,
    },
    /// Refused by the collector; never retried.
    Rejected {
        session_id: String,
        timestamp: String,
        reason: String,
    },
    /// Purged by [`UploadPipeline::cancel_all`].
    Cancelled { session_id: String, count: usize },
}

/// Network-availability signal shared with the upload workers.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    sender: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            info!(online, "network availability changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

struct Queued {
    task: UploadTask,
    not_before: Instant,
    /// Enqueue order; tasks older than a session's cancel cutoff are stale.
    generation: u64,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Queued>,
    next_generation: u64,
    /// Generation -> session id of tasks taken by a worker.
    in_flight: HashMap<u64, String>,
    /// Session id -> first generation still valid after a cancel. An entry
    /// lives only while a task older than its cutoff is queued or in flight.
    cancelled: HashMap<String, u64>,
}

impl Queue {
    fn is_stale(&self, queued: &Queued) -> bool {
        self.cancelled
            .get(&queued.task.session_id)
            .is_some_and(|cutoff| queued.generation < *cutoff)
    }

    /// A worker is done with the task of `generation`.
    fn finish(&mut self, generation: u64) {
        self.in_flight.remove(&generation);
        self.prune_cancelled();
    }

    fn prune_cancelled(&mut self) {
        let Queue {
            pending,
            in_flight,
            cancelled,
            ..
        } = self;
        cancelled.retain(|session_id, cutoff| {
            pending
                .iter()
                .any(|q| q.task.session_id == *session_id && q.generation < *cutoff)
                || in_flight
                    .iter()
                    .any(|(generation, s)| s == session_id && *generation < *cutoff)
        });
    }
}

enum Next {
    Ready(Queued),
    Later(Instant),
    Empty,
}

struct Shared {
    api: Arc<dyn CollectorApi>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    queue: Mutex<Queue>,
    wakeup: Notify,
    network: NetworkStatus,
    cancel_epoch: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    outcomes: broadcast::Sender<UploadOutcome>,
    log: SharedTelemetryLog,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, outcome: UploadOutcome) {
        // No subscribers is fine
        let _ = self.outcomes.send(outcome);
    }

    /// Take the earliest due task, or report when the next one is due.
    fn next_ready(&self, now: Instant) -> Next {
        let mut queue = self.queue();
        let earliest = queue
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, q)| (q.not_before, q.generation))
            .map(|(index, q)| (index, q.not_before));

        match earliest {
            Some((index, at)) if at <= now => match queue.pending.remove(index) {
                Some(queued) => {
                    queue
                        .in_flight
                        .insert(queued.generation, queued.task.session_id.clone());
                    Next::Ready(queued)
                }
                None => Next::Empty,
            },
            Some((_, at)) => Next::Later(at),
            None => Next::Empty,
        }
    }

    async fn run(self: Arc<Self>, worker: usize) {
        let mut online = self.network.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        let mut cancels = self.cancel_epoch.subscribe();
        debug!(worker, "upload worker started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => continue,
                up = async { online.wait_for(|up| *up).await.is_ok() } => {
                    if !up {
                        break;
                    }
                }
            }

            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.next_ready(Instant::now()) {
                Next::Ready(queued) => self.process(queued, &mut cancels).await,
                Next::Later(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Next::Empty => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        debug!(worker, "upload worker stopped");
    }

    async fn deliver(&self, task: &UploadTask) -> Result<SampleReceipt, GatewayError> {
        tokio::time::timeout(
            self.attempt_timeout,
            self.api.ingest_sample(&task.bearer_token, &task.request),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout))
    }

    async fn process(&self, queued: Queued, cancels: &mut watch::Receiver<u64>) {
        cancels.borrow_and_update();

        let result = {
            let delivery = self.deliver(&queued.task);
            tokio::pin!(delivery);
            loop {
                tokio::select! {
                    result = &mut delivery => break Some(result),
                    changed = cancels.changed() => {
                        if changed.is_err() || self.queue().is_stale(&queued) {
                            break None;
                        }
                    }
                }
            }
        };

        let generation = queued.generation;
        match result {
            Some(result) => {
                // A retry is requeued before the task leaves the in-flight set
                self.settle(queued, result);
                self.queue().finish(generation);
            }
            None => {
                self.queue().finish(generation);
                debug!(session_id = %queued.task.session_id, "in-flight upload abandoned");
                self.log.record_uploads_cancelled(1);
                self.publish(UploadOutcome::Cancelled {
                    session_id: queued.task.session_id,
                    count: 1,
                });
            }
        }
    }

    fn settle(&self, mut queued: Queued, result: Result<SampleReceipt, GatewayError>) {
        let session_id = queued.task.session_id.clone();
        let timestamp = queued.task.request.timestamp.clone();
        let attempts = queued.task.attempt + 1;

        match (classify(&result), result) {
            (Delivery::Success, Ok(receipt)) => {
                debug!(session_id = %session_id, timestamp = %timestamp, attempts, "sample delivered");
                self.log.record_sample_delivered();
                self.publish(UploadOutcome::Delivered {
                    session_id,
                    timestamp,
                    sample_id: receipt.sample_id,
                });
            }
            (Delivery::Retryable, Err(e)) => match self.policy.delay_for(attempts) {
                Some(delay) => {
                    let mut queue = self.queue();
                    if queue.is_stale(&queued) {
                        drop(queue);
                        self.log.record_uploads_cancelled(1);
                        self.publish(UploadOutcome::Cancelled {
                            session_id,
                            count: 1,
                        });
                        return;
                    }
                    warn!(
                        session_id = %session_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "upload failed, retrying: {e}"
                    );
                    queued.task.attempt = attempts;
                    queued.not_before = Instant::now() + delay;
                    queue.pending.push_back(queued);
                    drop(queue);

                    self.log.record_upload_retry();
                    self.wakeup.notify_one();
                    self.publish(UploadOutcome::Retrying {
                        session_id,
                        timestamp,
                        attempt: attempts,
                        delay,
                    });
                }
                None => {
                    warn!(
                        session_id = %session_id,
                        timestamp = %timestamp,
                        attempts,
                        "dropping sample after exhausting retries: {e}"
                    );
                    self.log.record_sample_dropped();
                    self.publish(UploadOutcome::Exhausted {
                        session_id,
                        timestamp,
                        attempts,
                    });
                }
            },
            (_, result) => {
                let reason = match result {
                    Err(e) if e.is_auth() => format!("credentials refused: {}", e.message()),
                    Err(e) => e.message(),
                    Ok(_) => "unexpected receipt".to_string(),
                };
                warn!(session_id = %session_id, timestamp = %timestamp, "sample rejected: {reason}");
                self.log.record_sample_rejected();
                self.publish(UploadOutcome::Rejected {
                    session_id,
                    timestamp,
                    reason,
                });
            }
        }
    }
}

/// Handle to the upload queue and its workers. Cheap to clone.
#[derive(Clone)]
pub struct UploadPipeline {
    shared: Arc<Shared>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    worker_count: usize,
}

impl UploadPipeline {
    pub fn new(
        api: Arc<dyn CollectorApi>,
        config: &UploadConfig,
        network: NetworkStatus,
        log: SharedTelemetryLog,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(256);
        let (cancel_epoch, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                api,
                policy: config.retry_policy(),
                attempt_timeout: config.attempt_timeout,
                queue: Mutex::new(Queue::default()),
                wakeup: Notify::new(),
                network,
                cancel_epoch,
                shutdown,
                outcomes,
                log,
            }),
            workers: Arc::new(Mutex::new(Vec::new())),
            worker_count: config.workers.max(1),
        }
    }

    /// Spawn the worker pool on the current tokio runtime. Calling this
    /// while workers are running is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers();
        if !workers.is_empty() {
            return;
        }
        self.shared.shutdown.send_replace(false);
        for worker in 0..self.worker_count {
            workers.push(tokio::spawn(self.shared.clone().run(worker)));
        }
        info!(workers = self.worker_count, "upload pipeline started");
    }

    /// Queue a task. Accepted while offline; delivery waits for the network.
    pub fn enqueue(&self, task: UploadTask) {
        {
            let mut queue = self.shared.queue();
            let generation = queue.next_generation;
            queue.next_generation += 1;
            debug!(session_id = %task.session_id, timestamp = %task.request.timestamp, "sample queued");
            queue.pending.push_back(Queued {
                task,
                not_before: Instant::now(),
                generation,
            });
        }
        self.shared.log.record_sample_enqueued();
        self.shared.wakeup.notify_one();
    }

    /// Remove every queued task for `session_id` and abandon its in-flight
    /// attempts. Tasks enqueued afterwards are unaffected.
    pub fn cancel_all(&self, session_id: &str) -> usize {
        let removed = {
            let mut queue = self.shared.queue();
            let cutoff = queue.next_generation;
            queue.cancelled.insert(session_id.to_string(), cutoff);
            let before = queue.pending.len();
            queue.pending.retain(|q| q.task.session_id != session_id);
            queue.prune_cancelled();
            before - queue.pending.len()
        };
        self.shared.cancel_epoch.send_modify(|epoch| *epoch += 1);

        if removed > 0 {
            info!(session_id = %session_id, removed, "cancelled queued uploads");
            self.shared.log.record_uploads_cancelled(removed as u64);
            self.shared.publish(UploadOutcome::Cancelled {
                session_id: session_id.to_string(),
                count: removed,
            });
        }
        removed
    }

    pub fn pending_len(&self) -> usize {
        self.shared.queue().pending.len()
    }

    pub fn pending_for(&self, session_id: &str) -> usize {
        self.shared
            .queue()
            .pending
            .iter()
            .filter(|q| q.task.session_id == session_id)
            .count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadOutcome> {
        self.shared.outcomes.subscribe()
    }

    pub fn network(&self) -> &NetworkStatus {
        &self.shared.network
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.shared.policy
    }

    /// Stop the workers. Queued tasks stay queued.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        let workers: Vec<_> = self.workers().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
    }

    fn workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
