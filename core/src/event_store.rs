//! Event store abstraction: append-only per-aggregate streams with
//! optimistic concurrency, plus the durable pending-publish queue.
//!
//! # Design
//!
//! The store has two faces:
//!
//! - the **stream** face used by repositories: [`EventStore::append`] with
//!   an expected-version check, and [`EventStore::load`] for replay;
//! - the **pending queue** face used by the publisher: every appended event
//!   also becomes a [`PendingEventRecord`] that exists until the publisher
//!   confirms delivery and deletes it. The presence of a record is the sole
//!   source of truth for "not yet published".
//!
//! Pending records are keyed by `(partition_key, row_key)` where the
//! partition key is the aggregate id string and the row key is
//! `Unpublished_<zero-padded version>`, so records within a partition sort
//! lexicographically in version order.
//!
//! # Dyn compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of `async fn` so the trait
//! can be used as `Arc<dyn EventStore>` across the repository, publisher,
//! and handlers.

use crate::event::StoredEvent;
use crate::stream::Version;
use thiserror::Error;
use uuid::Uuid;

/// Boxed future type used by the store and bus traits.
pub use futures::future::BoxFuture;

/// Row-key prefix of a not-yet-published event record.
pub const UNPUBLISHED_PREFIX: &str = "Unpublished_";

/// Errors from event store operations.
#[derive(Error, Debug, Clone)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: the stream moved since it was
    /// loaded. Recoverable by reloading and retrying the whole domain
    /// operation; never masked.
    #[error("concurrency conflict on {source_id}: expected {expected:?}, found {actual:?}")]
    ConcurrencyConflict {
        /// The aggregate whose stream conflicted.
        source_id: Uuid,
        /// The version the writer loaded.
        expected: Option<Version>,
        /// The stream's actual current version.
        actual: Option<Version>,
    },

    /// Referenced aggregate has no stream.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Underlying storage failed; typically transient.
    #[error("storage error: {0}")]
    Storage(String),

    /// Payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EventStoreError {
    /// Whether this error is the retryable optimistic-concurrency kind.
    #[must_use]
    pub const fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// A persisted event awaiting publication to the message bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEventRecord {
    /// Aggregate id string; the unit of ordered delivery.
    pub partition_key: String,
    /// `Unpublished_<zero-padded version>`.
    pub row_key: String,
    /// JSON-serialized event payload.
    pub payload: String,
    /// Stable event type identifier.
    pub event_type: String,
    /// Correlation id of the originating command, if any.
    pub correlation_id: Option<String>,
}

impl PendingEventRecord {
    /// Build the record for a stored event.
    #[must_use]
    pub fn from_stored(event: &StoredEvent) -> Self {
        Self {
            partition_key: event.source_id.to_string(),
            row_key: row_key(event.version),
            payload: event.payload.clone(),
            event_type: event.event_type.clone(),
            correlation_id: event.correlation_id.clone(),
        }
    }

    /// The version encoded in the row key, as its padded string form.
    #[must_use]
    pub fn version_string(&self) -> &str {
        self.row_key
            .strip_prefix(UNPUBLISHED_PREFIX)
            .unwrap_or(&self.row_key)
    }
}

/// Row key for a pending record at the given version.
#[must_use]
pub fn row_key(version: Version) -> String {
    format!("{UNPUBLISHED_PREFIX}{}", version.padded())
}

/// Append-only event store with optimistic concurrency and a pending queue.
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate's stream.
    ///
    /// `expected_version` is the stream version the writer observed at load
    /// time (`None` for a stream expected not to exist yet). If the stream
    /// has moved, the append is rejected with
    /// [`EventStoreError::ConcurrencyConflict`] and nothing is written.
    ///
    /// A successful append also durably enqueues one
    /// [`PendingEventRecord`] per event, marking them for publication.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::ConcurrencyConflict`]: the stream moved
    /// - [`EventStoreError::Storage`]: the write failed
    fn append(
        &self,
        source_id: Uuid,
        expected_version: Option<Version>,
        events: Vec<StoredEvent>,
    ) -> BoxFuture<'_, Result<(), EventStoreError>>;

    /// Load an aggregate's events, ordered by version ascending.
    ///
    /// With `after_version = Some(v)` only events with version > v are
    /// returned (used to replay the suffix after a snapshot). An unknown
    /// aggregate yields an empty vector, not an error.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::Storage`]: the read failed
    fn load(
        &self,
        source_id: Uuid,
        after_version: Option<Version>,
    ) -> BoxFuture<'_, Result<Vec<StoredEvent>, EventStoreError>>;

    /// Fetch pending records for one partition, version-ascending.
    ///
    /// Returns a page of records plus a flag indicating whether more are
    /// pending beyond this page.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::Storage`]: the read failed
    fn get_pending(
        &self,
        partition_key: &str,
    ) -> BoxFuture<'_, Result<(Vec<PendingEventRecord>, bool), EventStoreError>>;

    /// Delete a pending record after its successful delivery.
    ///
    /// Returns `false` if the record was already deleted by a competing
    /// publisher, which is not an error.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::Storage`]: the delete failed
    fn delete_pending(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> BoxFuture<'_, Result<bool, EventStoreError>>;

    /// List all partitions that currently have pending records.
    ///
    /// Used by the publisher's startup scan to rediscover events that were
    /// appended but never published before a restart.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::Storage`]: the scan failed
    fn partitions_with_pending(&self) -> BoxFuture<'_, Result<Vec<String>, EventStoreError>>;
}
