//! Event-sourced aggregate mechanics: replay, append, and snapshots.
//!
//! An aggregate embeds a [`SourcedRoot`] (identity, version, pending events)
//! and implements [`EventSourced::apply`] as an exhaustive `match` over its
//! event enum. Because dispatch is a sum-type match rather than a runtime
//! handler table, "event type without a registered handler" is a compile
//! error instead of a fault at replay time.
//!
//! # Lifecycle
//!
//! An aggregate instance is obtained one of three ways:
//!
//! 1. **Fresh**, with a deterministic id, immediately recording a creation
//!    event through [`EventSourced::update`].
//! 2. **Rehydrated** from its ordered event history via
//!    [`EventSourced::load_from`].
//! 3. **Rehydrated from a snapshot** ([`MementoOriginator`]) plus the event
//!    suffix after the snapshot's version — purely a read optimization; the
//!    event stream remains the source of truth.

use crate::event::VersionedEvent;
use crate::stream::Version;
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Identity, version, and pending events of an event-sourced aggregate.
///
/// `update` and `load_from` on [`EventSourced`] are the only writers; domain
/// code never manipulates the version or pending list directly.
#[derive(Clone, Debug)]
pub struct SourcedRoot<E> {
    id: Uuid,
    version: Option<Version>,
    pending: Vec<VersionedEvent<E>>,
}

impl<E> SourcedRoot<E> {
    /// Create a root for a fresh aggregate with no history.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self {
            id,
            version: None,
            pending: Vec::new(),
        }
    }

    /// Create a root restored from a snapshot taken at `version`.
    #[must_use]
    pub const fn at_version(id: Uuid, version: Version) -> Self {
        Self {
            id,
            version: Some(version),
            pending: Vec::new(),
        }
    }

    /// The aggregate's identity.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Version of the last applied event, or `None` for a fresh aggregate.
    #[must_use]
    pub const fn version(&self) -> Option<Version> {
        self.version
    }

    /// Version the next recorded event will get.
    #[must_use]
    pub fn next_version(&self) -> Version {
        self.version.map_or(Version::INITIAL, Version::next)
    }

    /// Events recorded since the aggregate was loaded.
    #[must_use]
    pub fn pending(&self) -> &[VersionedEvent<E>] {
        &self.pending
    }

    /// Version the aggregate had when it was loaded, before any pending
    /// events were recorded. This is the expected version for an optimistic
    /// concurrency check at save time.
    #[must_use]
    pub fn loaded_version(&self) -> Option<Version> {
        let pending = self.pending.len() as u64;
        match (self.version, pending) {
            (v, 0) => v,
            (Some(v), n) if v.value() + 1 > n => Some(Version::new(v.value() - n)),
            _ => None,
        }
    }

    fn record(&mut self, payload: E) {
        let version = self.next_version();
        self.pending.push(VersionedEvent {
            source_id: self.id,
            version,
            payload,
        });
        self.version = Some(version);
    }

    fn advance_to(&mut self, version: Version) {
        self.version = Some(version);
    }
}

/// Contract for event-sourced aggregates.
///
/// Implementors provide access to their embedded [`SourcedRoot`] and the
/// fold function `apply`; the replay-and-append mechanics are provided
/// methods. `apply` must be total over the aggregate's event enum and must
/// not fail: validation happens in the domain operation *before* `update`
/// is called, so that either all events of an operation are recorded or
/// none are.
pub trait EventSourced: Sized {
    /// The aggregate's event enum.
    type Event;

    /// The embedded root.
    fn root(&self) -> &SourcedRoot<Self::Event>;

    /// Mutable access to the embedded root.
    fn root_mut(&mut self) -> &mut SourcedRoot<Self::Event>;

    /// Fold one event into the in-memory projection.
    fn apply(&mut self, event: &Self::Event);

    /// The aggregate's identity.
    fn id(&self) -> Uuid {
        self.root().id()
    }

    /// Version of the last applied event, or `None` for a fresh aggregate.
    fn version(&self) -> Option<Version> {
        self.root().version()
    }

    /// Record a new fact: stamp it with the aggregate's id and next version,
    /// fold it into the projection, and queue it for persistence.
    ///
    /// This is the only way new facts enter the system, and it must be
    /// called synchronously from within a domain operation so the in-memory
    /// projection and the emitted event stay consistent.
    fn update(&mut self, payload: Self::Event)
    where
        Self::Event: Clone,
    {
        self.apply(&payload);
        self.root_mut().record(payload);
    }

    /// Replay an ordered event history during reconstruction.
    ///
    /// Applies each event's fold and advances the version; nothing is added
    /// to the pending list.
    fn load_from<I>(&mut self, history: I)
    where
        I: IntoIterator<Item = VersionedEvent<Self::Event>>,
    {
        for event in history {
            self.apply(&event.payload);
            self.root_mut().advance_to(event.version);
        }
    }

    /// Events recorded since the aggregate was loaded.
    ///
    /// Consumed exactly once by the persistence layer after a successful
    /// domain operation.
    fn events(&self) -> &[VersionedEvent<Self::Event>] {
        self.root().pending()
    }
}

/// Snapshot support for aggregates with long event streams.
///
/// A memento is an opaque, serializable copy of internal state plus the
/// version it corresponds to. It is a cache, never the source of truth, and
/// must never be mutated after creation: multiple in-flight aggregate
/// instances may reference logically equivalent snapshots, so restoring
/// always copies the state by value.
pub trait MementoOriginator: EventSourced {
    /// The aggregate's snapshot type.
    type Memento: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Capture the current state as a snapshot.
    fn save_to_memento(&self) -> Self::Memento;

    /// Restore an instance from a snapshot, copying its state.
    fn from_memento(id: Uuid, memento: &Self::Memento) -> Self;
}
