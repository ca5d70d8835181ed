//! In-memory event store with the same contract as a production store:
//! optimistic concurrency on append, durable pending records, paged reads.

use conference_core::event::StoredEvent;
use conference_core::event_store::{
    BoxFuture, EventStore, EventStoreError, PendingEventRecord,
};
use conference_core::stream::Version;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// How many pending records one fetch returns before paging.
const DEFAULT_PAGE_SIZE: usize = 500;

/// In-memory [`EventStore`] for tests.
///
/// Streams and the pending queue live behind plain mutexes; pending records
/// are keyed `(partition, row)` in a sorted map so fetches come back in
/// version order exactly like a range scan would.
#[derive(Debug)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<Uuid, Vec<StoredEvent>>>,
    pending: Mutex<BTreeMap<(String, String), PendingEventRecord>>,
    page_size: usize,
}

impl InMemoryEventStore {
    /// An empty store with the default pending-page size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            pending: Mutex::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// An empty store returning at most `page_size` pending records per
    /// fetch, for exercising the publisher's paging path.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::new()
        }
    }

    /// Number of pending records across all partitions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Drop one pending record out-of-band, simulating a competing
    /// publisher that got to it first.
    pub fn steal_pending(&self, partition_key: &str, row_key: &str) -> bool {
        self.lock_pending()
            .remove(&(partition_key.to_string(), row_key.to_string()))
            .is_some()
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<StoredEvent>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, BTreeMap<(String, String), PendingEventRecord>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        source_id: Uuid,
        expected_version: Option<Version>,
        events: Vec<StoredEvent>,
    ) -> BoxFuture<'_, Result<(), EventStoreError>> {
        Box::pin(async move {
            let mut streams = self.lock_streams();
            let stream = streams.entry(source_id).or_default();
            let actual = stream.last().map(|event| event.version);
            if actual != expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    source_id,
                    expected: expected_version,
                    actual,
                });
            }
            let mut pending = self.lock_pending();
            for event in events {
                let record = PendingEventRecord::from_stored(&event);
                pending.insert(
                    (record.partition_key.clone(), record.row_key.clone()),
                    record,
                );
                stream.push(event);
            }
            Ok(())
        })
    }

    fn load(
        &self,
        source_id: Uuid,
        after_version: Option<Version>,
    ) -> BoxFuture<'_, Result<Vec<StoredEvent>, EventStoreError>> {
        Box::pin(async move {
            let streams = self.lock_streams();
            let events = streams
                .get(&source_id)
                .map(|stream| {
                    stream
                        .iter()
                        .filter(|event| after_version.is_none_or(|after| event.version > after))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(events)
        })
    }

    fn get_pending(
        &self,
        partition_key: &str,
    ) -> BoxFuture<'_, Result<(Vec<PendingEventRecord>, bool), EventStoreError>> {
        let partition_key = partition_key.to_string();
        Box::pin(async move {
            let pending = self.lock_pending();
            let mut records: Vec<PendingEventRecord> = pending
                .range((partition_key.clone(), String::new())..)
                .take_while(|((partition, _), _)| *partition == partition_key)
                .map(|(_, record)| record.clone())
                .collect();
            let has_more = records.len() > self.page_size;
            records.truncate(self.page_size);
            Ok((records, has_more))
        })
    }

    fn delete_pending(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> BoxFuture<'_, Result<bool, EventStoreError>> {
        let key = (partition_key.to_string(), row_key.to_string());
        Box::pin(async move { Ok(self.lock_pending().remove(&key).is_some()) })
    }

    fn partitions_with_pending(&self) -> BoxFuture<'_, Result<Vec<String>, EventStoreError>> {
        Box::pin(async move {
            let pending = self.lock_pending();
            let mut partitions: Vec<String> = pending
                .keys()
                .map(|(partition, _)| partition.clone())
                .collect();
            partitions.dedup();
            Ok(partitions)
        })
    }
}
