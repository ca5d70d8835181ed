//! Event model: domain events, version-stamped events, and their serialized
//! storage form.
//!
//! Events represent immutable facts. They are produced only by an
//! aggregate's `update` operation (see [`crate::sourcing::EventSourced`]),
//! serialized to a textual (JSON) representation for storage and transport,
//! and replayed to reconstruct state.

use crate::stream::Version;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

/// Errors from event serialization and deserialization.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event payload to JSON.
    #[error("failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event payload from JSON.
    ///
    /// At a consuming boundary this routes the message to the dead-letter
    /// path; it is never silently discarded or retried indefinitely.
    #[error("failed to deserialize event: {0}")]
    Deserialization(String),
}

/// A domain event payload.
///
/// Implementors are usually enums, one per aggregate, with `event_type`
/// returning a stable, versioned identifier per variant:
///
/// ```
/// use conference_core::event::DomainEvent;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// enum OrderEvent {
///     OrderPlaced { order_id: String },
/// }
///
/// impl DomainEvent for OrderEvent {
///     fn event_type(&self) -> &'static str {
///         match self {
///             OrderEvent::OrderPlaced { .. } => "OrderPlaced.v1",
///         }
///     }
/// }
/// ```
///
/// The identifier is carried as type metadata alongside the serialized
/// payload so a receiver can reconstruct the exact original type.
pub trait DomainEvent: Send + Sync + 'static {
    /// Stable type identifier for this event (e.g. `"SeatsReserved.v1"`).
    fn event_type(&self) -> &'static str;

    /// Serialize this event to its textual representation.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized, which is rare with JSON-representable types.
    fn to_json(&self) -> Result<String, EventError>
    where
        Self: Serialize,
    {
        serde_json::to_string(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserialize an event from its textual representation.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the text does not encode
    /// this event type.
    fn from_json(json: &str) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        serde_json::from_str(json).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

/// An event stamped with its source aggregate and stream position.
///
/// Produced only by [`crate::sourcing::EventSourced::update`]; within one
/// aggregate stream, versions are contiguous and unique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedEvent<E> {
    /// Id of the aggregate that emitted the event.
    pub source_id: Uuid,
    /// Position of the event in the aggregate's stream.
    pub version: Version,
    /// The domain event payload.
    pub payload: E,
}

/// The serialized form of a versioned event, as persisted by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    /// Id of the aggregate that emitted the event.
    pub source_id: Uuid,
    /// Position of the event in the aggregate's stream.
    pub version: Version,
    /// Stable type identifier (e.g. `"SeatsReserved.v1"`).
    pub event_type: String,
    /// JSON-serialized payload.
    pub payload: String,
    /// Correlation id of the command that produced the event, if any.
    pub correlation_id: Option<String>,
}

impl StoredEvent {
    /// Serialize a versioned event for storage.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn from_versioned<E>(
        event: &VersionedEvent<E>,
        correlation_id: Option<String>,
    ) -> Result<Self, EventError>
    where
        E: DomainEvent + Serialize,
    {
        Ok(Self {
            source_id: event.source_id,
            version: event.version,
            event_type: event.payload.event_type().to_string(),
            payload: event.payload.to_json()?,
            correlation_id,
        })
    }

    /// Deserialize back into a versioned event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the payload does not
    /// encode `E`.
    pub fn to_versioned<E>(&self) -> Result<VersionedEvent<E>, EventError>
    where
        E: DomainEvent + DeserializeOwned,
    {
        Ok(VersionedEvent {
            source_id: self.source_id,
            version: self.version,
            payload: E::from_json(&self.payload)?,
        })
    }
}
