//! Bounded dead-letter queue for undeliverable messages.
//!
//! A message lands here when a consuming boundary cannot make sense of it
//! (unknown type, corrupt payload) or a handler rejects it permanently.
//! Dead-lettering consumes the message: it is kept for inspection instead of
//! being retried forever or silently dropped.

use chrono::{DateTime, Utc};
use conference_core::event_bus::BusMessage;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// An undeliverable message plus why and when it failed.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    /// The message as received.
    pub message: BusMessage,
    /// Why it could not be processed.
    pub reason: String,
    /// When it was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

/// Fixed-capacity queue of dead letters; the oldest letter is evicted when
/// the queue is full.
#[derive(Debug)]
pub struct DeadLetterQueue {
    capacity: usize,
    letters: Mutex<VecDeque<DeadLetter>>,
}

impl DeadLetterQueue {
    /// A queue retaining up to `capacity` letters.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            letters: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Record an undeliverable message.
    pub fn push(&self, message: BusMessage, reason: impl Into<String>, failed_at: DateTime<Utc>) {
        let reason = reason.into();
        warn!(
            message_id = %message.message_id,
            message_type = %message.message_type,
            %reason,
            "message dead-lettered"
        );
        let mut letters = self.lock();
        if letters.len() >= self.capacity {
            letters.pop_front();
        }
        letters.push_back(DeadLetter {
            message,
            reason,
            failed_at,
        });
    }

    /// Number of letters currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take all retained letters, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.lock().drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DeadLetter>> {
        self.letters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> BusMessage {
        BusMessage {
            body: "{}".to_string(),
            message_id: id.to_string(),
            session_id: None,
            correlation_id: None,
            message_type: "Test".to_string(),
            delay: None,
            time_to_live: None,
        }
    }

    #[test]
    fn retains_letters_in_arrival_order() {
        let queue = DeadLetterQueue::new(8);
        queue.push(message("a"), "bad payload", Utc::now());
        queue.push(message("b"), "unknown type", Utc::now());

        let letters = queue.drain();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].message.message_id, "a");
        assert_eq!(letters[1].reason, "unknown type");
        assert!(queue.is_empty());
    }

    #[test]
    fn evicts_oldest_when_full() {
        let queue = DeadLetterQueue::new(2);
        queue.push(message("a"), "x", Utc::now());
        queue.push(message("b"), "x", Utc::now());
        queue.push(message("c"), "x", Utc::now());

        let ids: Vec<_> = queue
            .drain()
            .into_iter()
            .map(|l| l.message.message_id)
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }
}
