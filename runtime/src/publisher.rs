//! Reliable event publisher: drains pending-event records from the store to
//! the message bus.
//!
//! Each aggregate id is a partition; partitions are processed one at a time
//! per worker slot, records strictly in version order, and each record is
//! deleted from the pending queue immediately after its send is
//! acknowledged, before the next record is sent. A crash mid-partition
//! therefore leaves no gap: the next attempt resumes from the first record
//! still present.
//!
//! Partition keys enter through [`EventStoreBusPublisher::enqueue_partition`]
//! (called after every append) and through the startup scan, which
//! rediscovers partitions whose records were appended but never published
//! before a restart. A key already waiting in the queue is not added twice.
//!
//! Delivery is at-least-once. The message id is the deterministic
//! `<partition>_<padded version>` string, so consumers can discard
//! redeliveries.
//!
//! Backpressure feeds the throttle three ways: a transient send retry and a
//! round trip slower than the configured threshold each penalize softly
//! (the slow one even when the send succeeds), and a failed partition
//! penalizes hard.

use crate::retry::RetryPolicy;
use crate::throttling::DynamicThrottling;
use conference_core::event_bus::{BusMessage, MessageSender, MessageSenderError};
use conference_core::event_store::{EventStore, EventStoreError, PendingEventRecord};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Round trips slower than this count as transport stress.
const DEFAULT_SLOW_SEND_THRESHOLD: Duration = Duration::from_millis(500);

/// Errors that fail a partition's unit of work.
#[derive(Error, Debug)]
pub enum PublisherError {
    /// Reading or deleting pending records failed.
    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// The transport refused a message beyond the retry budget.
    #[error(transparent)]
    Send(#[from] MessageSenderError),
}

/// Receives the partition key of every successful append, so freshly
/// stored events are drained without waiting for the next startup scan.
/// Repositories call this right after the event-store save.
pub trait PendingEventsNotifier: Send + Sync {
    /// A partition gained new pending records.
    fn pending_appended(&self, partition_key: &str);
}

impl PendingEventsNotifier for EventStoreBusPublisher {
    fn pending_appended(&self, partition_key: &str) {
        self.enqueue_partition(partition_key);
    }
}

enum PartitionOutcome {
    /// Every record fetched was sent and deleted (or the publisher is
    /// shutting down and stopped cleanly between records).
    Drained,
    /// A competing publisher deleted a record first; yield and retry later.
    LostToRacer,
}

/// Drains per-partition pending-event queues to the bus. See module docs.
pub struct EventStoreBusPublisher {
    store: Arc<dyn EventStore>,
    sender: Arc<dyn MessageSender>,
    throttling: Arc<DynamicThrottling>,
    retry: RetryPolicy,
    slow_send_threshold: Duration,
    enqueued_keys: Mutex<HashSet<String>>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    shutting_down: AtomicBool,
}

impl EventStoreBusPublisher {
    /// A publisher over the given store and transport, gated by `throttling`.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        sender: Arc<dyn MessageSender>,
        throttling: Arc<DynamicThrottling>,
        retry: RetryPolicy,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            store,
            sender,
            throttling,
            retry,
            slow_send_threshold: DEFAULT_SLOW_SEND_THRESHOLD,
            enqueued_keys: Mutex::new(HashSet::new()),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Override how slow a successful round trip may be before it counts as
    /// transport stress.
    #[must_use]
    pub const fn with_slow_send_threshold(mut self, threshold: Duration) -> Self {
        self.slow_send_threshold = threshold;
        self
    }

    /// Queue a partition for draining. Deduplicated: a key already waiting
    /// is not queued twice.
    pub fn enqueue_partition(&self, partition_key: &str) {
        let mut keys = self.lock_keys();
        if keys.insert(partition_key.to_string()) {
            // receiver outlives the sender; a send can only fail after run()
            // returned, when nothing will drain the queue anyway
            let _ = self.queue_tx.send(partition_key.to_string());
        }
    }

    /// Run the publisher until the shutdown signal fires.
    ///
    /// Starts with a scan for partitions that already have pending records,
    /// then consumes the key queue, fanning each partition out onto a worker
    /// task gated by the throttle. On shutdown, in-flight partitions finish
    /// their current record and stop; whatever remains pending is picked up
    /// by the next startup scan.
    ///
    /// # Errors
    ///
    /// [`PublisherError::Store`] if the startup scan cannot read the store.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), PublisherError> {
        let stale = self.store.partitions_with_pending().await?;
        if !stale.is_empty() {
            info!(partitions = stale.len(), "startup scan found unpublished events");
        }
        for key in stale {
            self.enqueue_partition(&key);
        }

        let mut queue_rx = self.queue_rx.lock().await;
        let mut workers: JoinSet<()> = JoinSet::new();
        loop {
            let key = tokio::select! {
                _ = shutdown.recv() => break,
                Some(_) = workers.join_next(), if !workers.is_empty() => continue,
                maybe_key = queue_rx.recv() => match maybe_key {
                    Some(key) => key,
                    None => break,
                },
            };

            if !self
                .throttling
                .wait_until_allowed_parallelism(&mut shutdown)
                .await
            {
                break;
            }

            self.lock_keys().remove(&key);
            self.throttling.notify_work_started();
            let publisher = Arc::clone(&self);
            workers.spawn(async move { publisher.drain_partition(key).await });
        }

        self.shutting_down.store(true, Ordering::Release);
        while workers.join_next().await.is_some() {}
        debug!("publisher stopped");
        Ok(())
    }

    async fn drain_partition(&self, key: String) {
        match self.process_partition(&key).await {
            Ok(PartitionOutcome::Drained) => {
                trace!(partition = %key, "partition drained");
                self.throttling.notify_work_completed();
            }
            Ok(PartitionOutcome::LostToRacer) => {
                debug!(partition = %key, "partition lost to a competing publisher");
                self.enqueue_partition(&key);
                self.throttling.notify_work_completed();
            }
            Err(error) => {
                warn!(partition = %key, %error, "partition publish failed, re-enqueued");
                self.enqueue_partition(&key);
                self.throttling.notify_work_completed_with_error();
            }
        }
    }

    async fn process_partition(&self, key: &str) -> Result<PartitionOutcome, PublisherError> {
        loop {
            let (records, has_more) = self.store.get_pending(key).await?;
            if records.is_empty() {
                return Ok(PartitionOutcome::Drained);
            }
            for record in &records {
                self.send_with_retry(key, record).await?;
                // delete before touching the next record, so a crash leaves
                // no published-but-still-pending prefix gap
                let deleted = self.store.delete_pending(key, &record.row_key).await?;
                if !deleted {
                    return Ok(PartitionOutcome::LostToRacer);
                }
                if self.shutting_down.load(Ordering::Acquire) {
                    return Ok(PartitionOutcome::Drained);
                }
            }
            if !has_more {
                return Ok(PartitionOutcome::Drained);
            }
        }
    }

    async fn send_with_retry(
        &self,
        key: &str,
        record: &PendingEventRecord,
    ) -> Result<(), MessageSenderError> {
        let message = BusMessage {
            body: record.payload.clone(),
            message_id: format!("{key}_{}", record.version_string()),
            session_id: Some(key.to_string()),
            correlation_id: record.correlation_id.clone(),
            message_type: record.event_type.clone(),
            delay: None,
            time_to_live: None,
        };

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            match self.sender.send(message.clone()).await {
                Ok(()) => {
                    // a slow round trip is a stress signal even on success
                    let elapsed = started.elapsed();
                    if elapsed >= self.slow_send_threshold {
                        self.throttling.penalize();
                        debug!(
                            message_id = %message.message_id,
                            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                            "slow send, penalizing"
                        );
                    }
                    return Ok(());
                }
                Err(error) if error.is_transient() && attempt < self.retry.max_attempts() => {
                    attempt += 1;
                    self.throttling.penalize();
                    warn!(
                        message_id = %message.message_id,
                        attempt,
                        %error,
                        "transient send failure, retrying"
                    );
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn lock_keys(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.enqueued_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
