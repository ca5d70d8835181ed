//! Recording message sender with scriptable failures.

use conference_core::event_bus::{BusMessage, MessageSender, MessageSenderError};
use conference_core::event_store::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// [`MessageSender`] double that records every accepted message and can be
/// scripted to fail upcoming sends.
#[derive(Debug, Default)]
pub struct RecordingMessageSender {
    sent: Mutex<Vec<BusMessage>>,
    failures: Mutex<VecDeque<MessageSenderError>>,
}

impl RecordingMessageSender {
    /// A sender that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next send to fail with `error`. Queued failures are
    /// consumed in order, one per send attempt.
    pub fn fail_next(&self, error: MessageSenderError) {
        self.lock_failures().push_back(error);
    }

    /// Every message accepted so far, in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<BusMessage> {
        self.lock_sent().clone()
    }

    /// Message ids accepted so far, in send order.
    #[must_use]
    pub fn sent_ids(&self) -> Vec<String> {
        self.lock_sent()
            .iter()
            .map(|message| message.message_id.clone())
            .collect()
    }

    fn lock_sent(&self) -> MutexGuard<'_, Vec<BusMessage>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_failures(&self) -> MutexGuard<'_, VecDeque<MessageSenderError>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageSender for RecordingMessageSender {
    fn send(&self, message: BusMessage) -> BoxFuture<'_, Result<(), MessageSenderError>> {
        Box::pin(async move {
            if let Some(error) = self.lock_failures().pop_front() {
                return Err(error);
            }
            self.lock_sent().push(message);
            Ok(())
        })
    }
}
