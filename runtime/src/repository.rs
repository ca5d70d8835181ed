//! Repositories: load-modify-save cycles over event-sourced aggregates.
//!
//! [`EventSourcedRepository`] rehydrates an aggregate by replaying its full
//! stream; [`SnapshottingRepository`] keeps an in-memory memento per
//! aggregate and replays only the suffix recorded after the snapshot. Both
//! save with the optimistic expected-version check: on a concurrency
//! conflict the caller reloads and re-runs the whole domain operation.

use crate::publisher::PendingEventsNotifier;
use conference_core::event::{DomainEvent, StoredEvent, VersionedEvent};
use conference_core::event_store::{EventStore, EventStoreError};
use conference_core::{EventSourced, MementoOriginator};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// An event-sourced aggregate that can be built empty and replayed into.
pub trait Rehydratable: EventSourced {
    /// An instance with the given identity and no state or history.
    fn blank(id: Uuid) -> Self;
}

fn replay<A>(aggregate: &mut A, stored: &[StoredEvent]) -> Result<(), EventStoreError>
where
    A: EventSourced,
    A::Event: DomainEvent + DeserializeOwned,
{
    let mut history: Vec<VersionedEvent<A::Event>> = Vec::with_capacity(stored.len());
    for event in stored {
        history.push(
            event
                .to_versioned()
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?,
        );
    }
    aggregate.load_from(history);
    Ok(())
}

fn to_stored<A>(aggregate: &A, correlation_id: Option<&str>) -> Result<Vec<StoredEvent>, EventStoreError>
where
    A: EventSourced,
    A::Event: DomainEvent + Serialize,
{
    let mut stored = Vec::with_capacity(aggregate.events().len());
    for event in aggregate.events() {
        stored.push(
            StoredEvent::from_versioned(event, correlation_id.map(str::to_string))
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?,
        );
    }
    Ok(stored)
}

/// Repository that rehydrates aggregates by full replay.
pub struct EventSourcedRepository<A> {
    store: Arc<dyn EventStore>,
    publisher: Option<Arc<dyn PendingEventsNotifier>>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> EventSourcedRepository<A>
where
    A: Rehydratable,
    A::Event: DomainEvent + Serialize + DeserializeOwned,
{
    /// A repository over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            publisher: None,
            _aggregate: PhantomData,
        }
    }

    /// Nudge this publisher after every successful save, so appended events
    /// are drained without waiting for a startup scan.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn PendingEventsNotifier>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Load an aggregate, or `None` if it has no stream.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::Storage`] on read failure,
    /// [`EventStoreError::Serialization`] on a corrupt payload.
    pub async fn find(&self, id: Uuid) -> Result<Option<A>, EventStoreError> {
        let stored = self.store.load(id, None).await?;
        if stored.is_empty() {
            return Ok(None);
        }
        let mut aggregate = A::blank(id);
        replay(&mut aggregate, &stored)?;
        Ok(Some(aggregate))
    }

    /// Load an aggregate that must exist.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::AggregateNotFound`] if it has no stream, plus the
    /// errors of [`Self::find`].
    pub async fn get(&self, id: Uuid) -> Result<A, EventStoreError> {
        self.find(id)
            .await?
            .ok_or(EventStoreError::AggregateNotFound(id))
    }

    /// Persist the aggregate's pending events.
    ///
    /// The append carries the version observed at load time; a conflicting
    /// writer surfaces as [`EventStoreError::ConcurrencyConflict`] and the
    /// caller must reload and retry the whole operation. The correlation id
    /// (the causing command's id) is stamped on every stored event so
    /// downstream consumers can match replies to requests.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::ConcurrencyConflict`] if the stream moved since
    /// load; [`EventStoreError::Storage`] / `Serialization` otherwise.
    pub async fn save(&self, aggregate: &A, correlation_id: Option<&str>) -> Result<(), EventStoreError> {
        if aggregate.events().is_empty() {
            return Ok(());
        }
        let expected = aggregate.root().loaded_version();
        let stored = to_stored(aggregate, correlation_id)?;
        self.store.append(aggregate.id(), expected, stored).await?;
        if let Some(publisher) = &self.publisher {
            publisher.pending_appended(&aggregate.id().to_string());
        }
        Ok(())
    }
}

/// Repository with a memento cache in front of replay.
///
/// Snapshots are a read optimization only: the stream remains the source of
/// truth, and a cache miss (or a cold process) falls back to full replay.
/// Mementos are never mutated after insertion; restoring copies the state.
pub struct SnapshottingRepository<A: MementoOriginator> {
    store: Arc<dyn EventStore>,
    publisher: Option<Arc<dyn PendingEventsNotifier>>,
    cache: Mutex<HashMap<Uuid, A::Memento>>,
}

impl<A> SnapshottingRepository<A>
where
    A: MementoOriginator + Rehydratable,
    A::Event: DomainEvent + Serialize + DeserializeOwned,
{
    /// A snapshotting repository over the given store, starting cold.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            publisher: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Nudge this publisher after every successful save, so appended events
    /// are drained without waiting for a startup scan.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn PendingEventsNotifier>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Load an aggregate, replaying only past the cached snapshot if one
    /// exists.
    ///
    /// # Errors
    ///
    /// Same as [`EventSourcedRepository::find`].
    pub async fn find(&self, id: Uuid) -> Result<Option<A>, EventStoreError> {
        let memento = self.cache.lock().await.get(&id).cloned();
        match memento {
            Some(memento) => {
                let mut aggregate = A::from_memento(id, &memento);
                let stored = self.store.load(id, aggregate.version()).await?;
                replay(&mut aggregate, &stored)?;
                Ok(Some(aggregate))
            }
            None => {
                let stored = self.store.load(id, None).await?;
                if stored.is_empty() {
                    return Ok(None);
                }
                let mut aggregate = A::blank(id);
                replay(&mut aggregate, &stored)?;
                Ok(Some(aggregate))
            }
        }
    }

    /// Load an aggregate that must exist.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::AggregateNotFound`] if it has no stream, plus the
    /// errors of [`Self::find`].
    pub async fn get(&self, id: Uuid) -> Result<A, EventStoreError> {
        self.find(id)
            .await?
            .ok_or(EventStoreError::AggregateNotFound(id))
    }

    /// Persist pending events and refresh the snapshot on success.
    ///
    /// # Errors
    ///
    /// Same as [`EventSourcedRepository::save`]. On failure the cache keeps
    /// the previous snapshot, which is still consistent with the stream.
    pub async fn save(&self, aggregate: &A, correlation_id: Option<&str>) -> Result<(), EventStoreError> {
        if aggregate.events().is_empty() {
            return Ok(());
        }
        let expected = aggregate.root().loaded_version();
        let stored = to_stored(aggregate, correlation_id)?;
        self.store.append(aggregate.id(), expected, stored).await?;
        self.cache
            .lock()
            .await
            .insert(aggregate.id(), aggregate.save_to_memento());
        if let Some(publisher) = &self.publisher {
            publisher.pending_appended(&aggregate.id().to_string());
        }
        Ok(())
    }
}
