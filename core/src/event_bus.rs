//! Message bus collaborator: the sender the publisher drains events into.
//!
//! The transport guarantees at-least-once delivery and, where it supports
//! sessions, ordering within a session. Nothing here assumes exactly-once:
//! consumers deduplicate on [`BusMessage::message_id`], which is
//! deterministic (`<partition>_<version>`) so redeliveries are discardable.

use crate::event_store::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// Errors from sending to the message bus.
#[derive(Error, Debug, Clone)]
pub enum MessageSenderError {
    /// Transient transport failure (timeout, throttling); retried with
    /// backoff and fed into the publisher's throttling penalty.
    #[error("transient send failure: {0}")]
    Transient(String),

    /// Non-transient failure; the unit of work is re-enqueued rather than
    /// dropped, but no immediate retry is attempted.
    #[error("send failed: {0}")]
    Failed(String),
}

impl MessageSenderError {
    /// Whether the failure is worth an immediate in-place retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A message as handed to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    /// Serialized payload text.
    pub body: String,
    /// Deterministic identity: `<partition_key>_<version>`; lets consumers
    /// discard redeliveries.
    pub message_id: String,
    /// Session for transports with per-session ordering; the aggregate id.
    pub session_id: Option<String>,
    /// Correlation id of the originating command, if any.
    pub correlation_id: Option<String>,
    /// Stable payload type identifier.
    pub message_type: String,
    /// Hold back before delivery.
    pub delay: Option<Duration>,
    /// Discard if undelivered within this window.
    pub time_to_live: Option<Duration>,
}

/// Sends messages to the bus. At-least-once; never assumed exactly-once.
pub trait MessageSender: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// - [`MessageSenderError::Transient`]: retryable transport hiccup
    /// - [`MessageSenderError::Failed`]: the send did not happen
    fn send(&self, message: BusMessage) -> BoxFuture<'_, Result<(), MessageSenderError>>;
}
