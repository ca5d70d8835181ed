//! Repository behavior against the in-memory store: rehydration, optimistic
//! concurrency, and snapshot-assisted loads.

#![allow(clippy::unwrap_used)]

use conference_core::event::DomainEvent;
use conference_core::event_store::{EventStore, EventStoreError};
use conference_core::stream::Version;
use conference_core::{EventSourced, MementoOriginator, SourcedRoot};
use conference_runtime::publisher::PendingEventsNotifier;
use conference_runtime::repository::{
    EventSourcedRepository, Rehydratable, SnapshottingRepository,
};
use conference_testing::InMemoryEventStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum LedgerEvent {
    Credited { amount: i64 },
    Debited { amount: i64 },
}

impl DomainEvent for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::Credited { .. } => "LedgerCredited.v1",
            LedgerEvent::Debited { .. } => "LedgerDebited.v1",
        }
    }
}

#[derive(Clone, Debug)]
struct Ledger {
    root: SourcedRoot<LedgerEvent>,
    balance: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LedgerMemento {
    version: Option<Version>,
    balance: i64,
}

impl Ledger {
    fn credit(&mut self, amount: i64) {
        self.update(LedgerEvent::Credited { amount });
    }

    fn debit(&mut self, amount: i64) {
        self.update(LedgerEvent::Debited { amount });
    }
}

impl EventSourced for Ledger {
    type Event = LedgerEvent;

    fn root(&self) -> &SourcedRoot<LedgerEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut SourcedRoot<LedgerEvent> {
        &mut self.root
    }

    fn apply(&mut self, event: &LedgerEvent) {
        match event {
            LedgerEvent::Credited { amount } => self.balance += amount,
            LedgerEvent::Debited { amount } => self.balance -= amount,
        }
    }
}

impl Rehydratable for Ledger {
    fn blank(id: Uuid) -> Self {
        Self {
            root: SourcedRoot::new(id),
            balance: 0,
        }
    }
}

impl MementoOriginator for Ledger {
    type Memento = LedgerMemento;

    fn save_to_memento(&self) -> LedgerMemento {
        LedgerMemento {
            version: self.version(),
            balance: self.balance,
        }
    }

    fn from_memento(id: Uuid, memento: &LedgerMemento) -> Self {
        let root = match memento.version {
            Some(version) => SourcedRoot::at_version(id, version),
            None => SourcedRoot::new(id),
        };
        Self {
            root,
            balance: memento.balance,
        }
    }
}

#[tokio::test]
async fn save_then_find_rehydrates_the_same_state() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let repository: EventSourcedRepository<Ledger> = EventSourcedRepository::new(store);
    let id = Uuid::new_v4();

    let mut ledger = Ledger::blank(id);
    ledger.credit(100);
    ledger.debit(30);
    repository.save(&ledger, Some("cmd-1")).await.unwrap();

    let loaded = repository.get(id).await.unwrap();
    assert_eq!(loaded.balance, 70);
    assert_eq!(loaded.version(), Some(Version::new(1)));
    assert!(loaded.events().is_empty());
}

#[tokio::test]
async fn find_returns_none_for_an_unknown_stream() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let repository: EventSourcedRepository<Ledger> = EventSourcedRepository::new(store);

    assert!(repository.find(Uuid::new_v4()).await.unwrap().is_none());
    assert!(matches!(
        repository.get(Uuid::new_v4()).await,
        Err(EventStoreError::AggregateNotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_saves_conflict_and_a_reload_retry_succeeds() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let repository: EventSourcedRepository<Ledger> = EventSourcedRepository::new(store);
    let id = Uuid::new_v4();

    let mut seed = Ledger::blank(id);
    seed.credit(100);
    repository.save(&seed, None).await.unwrap();

    // two writers load the same version
    let mut first = repository.get(id).await.unwrap();
    let mut second = repository.get(id).await.unwrap();

    first.debit(10);
    repository.save(&first, None).await.unwrap();

    second.debit(20);
    let conflict = repository.save(&second, None).await.unwrap_err();
    assert!(conflict.is_concurrency_conflict());

    // retry the whole load-modify-save cycle
    let mut retried = repository.get(id).await.unwrap();
    retried.debit(20);
    repository.save(&retried, None).await.unwrap();

    assert_eq!(repository.get(id).await.unwrap().balance, 70);
}

#[tokio::test]
async fn snapshotting_repository_matches_full_replay() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let snapshotting: SnapshottingRepository<Ledger> =
        SnapshottingRepository::new(Arc::clone(&store));
    let plain: EventSourcedRepository<Ledger> = EventSourcedRepository::new(Arc::clone(&store));
    let id = Uuid::new_v4();

    let mut ledger = Ledger::blank(id);
    ledger.credit(100);
    snapshotting.save(&ledger, None).await.unwrap();

    // a different writer appends past the snapshot
    let mut other = plain.get(id).await.unwrap();
    other.debit(25);
    plain.save(&other, None).await.unwrap();

    // the cached memento is only a prefix; the suffix replays on top
    let through_snapshot = snapshotting.get(id).await.unwrap();
    let through_replay = plain.get(id).await.unwrap();
    assert_eq!(through_snapshot.balance, through_replay.balance);
    assert_eq!(through_snapshot.version(), through_replay.version());
}

#[tokio::test]
async fn saving_with_no_pending_events_is_a_no_op() {
    let store = Arc::new(InMemoryEventStore::new());
    let repository: EventSourcedRepository<Ledger> =
        EventSourcedRepository::new(Arc::clone(&store) as Arc<dyn EventStore>);
    let id = Uuid::new_v4();

    let ledger = Ledger::blank(id);
    repository.save(&ledger, None).await.unwrap();
    assert_eq!(store.pending_count(), 0);
}

/// Captures the partition keys a repository announces after each save.
#[derive(Default)]
struct RecordingNotifier {
    keys: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PendingEventsNotifier for RecordingNotifier {
    fn pending_appended(&self, partition_key: &str) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(partition_key.to_string());
    }
}

#[tokio::test]
async fn successful_saves_announce_their_partition_to_the_publisher() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let repository: EventSourcedRepository<Ledger> =
        EventSourcedRepository::new(store).with_publisher(notifier.clone());
    let id = Uuid::new_v4();

    let mut ledger = Ledger::blank(id);
    ledger.credit(100);
    repository.save(&ledger, None).await.unwrap();

    assert_eq!(notifier.keys(), vec![id.to_string()]);

    // an empty save stores nothing and announces nothing
    let untouched = repository.get(id).await.unwrap();
    repository.save(&untouched, None).await.unwrap();
    assert_eq!(notifier.keys().len(), 1);
}

#[tokio::test]
async fn conflicted_saves_do_not_announce_a_partition() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let snapshotting: SnapshottingRepository<Ledger> =
        SnapshottingRepository::new(Arc::clone(&store)).with_publisher(notifier.clone());
    let plain: EventSourcedRepository<Ledger> = EventSourcedRepository::new(store);
    let id = Uuid::new_v4();

    let mut seed = Ledger::blank(id);
    seed.credit(100);
    snapshotting.save(&seed, None).await.unwrap();
    assert_eq!(notifier.keys().len(), 1);

    // a competing writer moves the stream, so this save must conflict
    let mut stale = snapshotting.get(id).await.unwrap();
    let mut winner = plain.get(id).await.unwrap();
    winner.debit(10);
    plain.save(&winner, None).await.unwrap();

    stale.debit(20);
    let conflict = snapshotting.save(&stale, None).await.unwrap_err();
    assert!(conflict.is_concurrency_conflict());
    assert_eq!(notifier.keys().len(), 1);
}

#[tokio::test]
async fn appended_events_become_pending_records_in_version_order() {
    let store = Arc::new(InMemoryEventStore::new());
    let repository: EventSourcedRepository<Ledger> =
        EventSourcedRepository::new(Arc::clone(&store) as Arc<dyn EventStore>);
    let id = Uuid::new_v4();

    let mut ledger = Ledger::blank(id);
    ledger.credit(1);
    ledger.credit(2);
    ledger.credit(3);
    repository.save(&ledger, None).await.unwrap();

    let (records, has_more) = store.get_pending(&id.to_string()).await.unwrap();
    assert!(!has_more);
    let versions: Vec<_> = records.iter().map(|r| r.version_string().to_string()).collect();
    let mut sorted = versions.clone();
    sorted.sort();
    assert_eq!(versions, sorted);
    assert_eq!(records.len(), 3);
}
