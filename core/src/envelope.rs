//! Message envelopes: a payload plus its delivery metadata.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A command or event wrapped with delivery metadata.
///
/// The envelope carries everything the transport needs: a unique message id
/// (for transport-side deduplication), an optional correlation id linking a
/// reply to its originating command, an optional delivery delay (for
/// scheduled messages such as expirations), and an optional time-to-live
/// after which the message is worthless.
///
/// # Examples
///
/// ```
/// use conference_core::envelope::Envelope;
/// use std::time::Duration;
///
/// let envelope = Envelope::new("pay the order")
///     .with_delay(Duration::from_secs(60))
///     .with_correlation_id("order-123");
///
/// assert_eq!(envelope.body, "pay the order");
/// assert!(envelope.delay.is_some());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The wrapped payload.
    pub body: T,
    /// Unique id of this message instance.
    pub message_id: Uuid,
    /// Links a reply to the command that requested it.
    pub correlation_id: Option<String>,
    /// Hold the message back for this long before delivering it.
    pub delay: Option<Duration>,
    /// Discard the message if not consumed within this window.
    pub time_to_live: Option<Duration>,
}

impl<T> Envelope<T> {
    /// Wrap a payload with a fresh message id and no delivery options.
    #[must_use]
    pub fn new(body: T) -> Self {
        Self {
            body,
            message_id: Uuid::new_v4(),
            correlation_id: None,
            delay: None,
            time_to_live: None,
        }
    }

    /// Set the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set a delivery delay.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set a time-to-live.
    #[must_use]
    pub const fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Map the body while keeping the delivery metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            body: f(self.body),
            message_id: self.message_id,
            correlation_id: self.correlation_id,
            delay: self.delay,
            time_to_live: self.time_to_live,
        }
    }
}
