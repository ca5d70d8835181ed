//! Adaptive concurrency gate for the publisher's partition fan-out.
//!
//! A self-tuning semaphore: the number of allowed parallel jobs starts at
//! the configured minimum, grows on clean completions and on a periodic
//! restore tick, and shrinks when the downstream transport shows stress
//! (retries, failures). This is the sole backpressure mechanism between
//! bursty publish fan-out and the transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Tuning parameters for [`DynamicThrottling`].
#[derive(Clone, Debug)]
pub struct DynamicThrottlingConfig {
    /// Ceiling on allowed parallel jobs.
    pub max_degree: i64,
    /// Floor on allowed parallel jobs; also the starting value.
    pub min_degree: i64,
    /// Degrees removed on a soft signal (one transient retry).
    pub retry_penalty: i64,
    /// Degrees removed when a unit of work fails outright.
    pub error_penalty: i64,
    /// Degrees added on a clean completion.
    pub completion_gain: i64,
    /// Interval at which one degree is restored unconditionally, so the
    /// gate heals toward higher concurrency even without successes.
    pub restore_interval: Duration,
}

impl Default for DynamicThrottlingConfig {
    fn default() -> Self {
        Self {
            max_degree: 230,
            min_degree: 30,
            retry_penalty: 3,
            error_penalty: 10,
            completion_gain: 1,
            restore_interval: Duration::from_secs(8),
        }
    }
}

/// Self-tuning parallelism gate. See the module docs.
#[derive(Debug)]
pub struct DynamicThrottling {
    config: DynamicThrottlingConfig,
    available_degrees: AtomicI64,
    parallel_jobs: AtomicI64,
    slot_freed: Notify,
}

impl DynamicThrottling {
    /// A gate starting at the configured minimum degree.
    #[must_use]
    pub fn new(config: DynamicThrottlingConfig) -> Self {
        let initial = config.min_degree;
        Self {
            config,
            available_degrees: AtomicI64::new(initial),
            parallel_jobs: AtomicI64::new(0),
            slot_freed: Notify::new(),
        }
    }

    /// Currently allowed parallel jobs.
    #[must_use]
    pub fn available_degrees(&self) -> i64 {
        self.available_degrees.load(Ordering::Acquire)
    }

    /// Jobs currently in flight.
    #[must_use]
    pub fn parallel_jobs(&self) -> i64 {
        self.parallel_jobs.load(Ordering::Acquire)
    }

    /// Wait until a new job may start, or until shutdown.
    ///
    /// Returns `false` if the shutdown signal fired while waiting. The wait
    /// is cooperative: no slot is taken; callers follow up with
    /// [`Self::notify_work_started`] once they actually dispatch work.
    pub async fn wait_until_allowed_parallelism(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        loop {
            // Arm the notification before checking, so a release between the
            // check and the await is not missed.
            let freed = self.slot_freed.notified();
            if self.parallel_jobs() < self.available_degrees() {
                return true;
            }
            trace!(
                jobs = self.parallel_jobs(),
                degrees = self.available_degrees(),
                "parallelism exhausted, waiting"
            );
            tokio::select! {
                () = freed => {}
                _ = shutdown.recv() => return false,
            }
        }
    }

    /// A job was dispatched.
    pub fn notify_work_started(&self) {
        self.parallel_jobs.fetch_add(1, Ordering::AcqRel);
    }

    /// A job finished cleanly; allowance grows a little.
    pub fn notify_work_completed(&self) {
        self.parallel_jobs.fetch_sub(1, Ordering::AcqRel);
        self.adjust_degrees(self.config.completion_gain);
        self.slot_freed.notify_waiters();
    }

    /// A job finished in failure; allowance shrinks hard.
    pub fn notify_work_completed_with_error(&self) {
        self.parallel_jobs.fetch_sub(1, Ordering::AcqRel);
        self.adjust_degrees(-self.config.error_penalty);
        self.slot_freed.notify_waiters();
    }

    /// Soft stress signal (a transient retry or a slow round trip).
    pub fn penalize(&self) {
        self.adjust_degrees(-self.config.retry_penalty);
    }

    /// Spawn the periodic restore timer. One degree is restored every
    /// configured interval until the shutdown signal fires.
    #[must_use]
    pub fn spawn_restore_timer(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gate.config.restore_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        gate.adjust_degrees(1);
                        gate.slot_freed.notify_waiters();
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    fn adjust_degrees(&self, delta: i64) {
        let min = self.config.min_degree;
        let max = self.config.max_degree;
        let result = self
            .available_degrees
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + delta).clamp(min, max))
            });
        if let Ok(previous) = result {
            let now = (previous + delta).clamp(min, max);
            if now != previous {
                debug!(from = previous, to = now, "throttling degrees adjusted");
            }
            if now > previous {
                self.slot_freed.notify_waiters();
            }
        }
    }
}
