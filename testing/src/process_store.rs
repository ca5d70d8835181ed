//! In-memory process manager store.

use conference_core::event_store::BoxFuture;
use conference_runtime::saga::{ProcessRecord, ProcessStore, ProcessStoreError};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

type Extractor<P, T> = Box<dyn Fn(&P) -> T + Send + Sync>;

/// In-memory [`ProcessStore`] for tests.
///
/// Generic over the process type: the constructor takes an extractor for
/// the correlation key the store indexes lookups by. Saves carry the
/// optimistic row-version check: a writer whose record moved since load is
/// rejected with [`ProcessStoreError::Concurrency`] instead of silently
/// overwriting.
pub struct InMemoryProcessStore<P> {
    records: Mutex<HashMap<Uuid, P>>,
    correlation_of: Extractor<P, Option<Uuid>>,
}

impl<P: ProcessRecord + Clone> InMemoryProcessStore<P> {
    /// An empty store using the given correlation extractor.
    pub fn new(correlation_of: impl Fn(&P) -> Option<Uuid> + Send + Sync + 'static) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            correlation_of: Box::new(correlation_of),
        }
    }

    /// Number of stored processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of one stored process.
    #[must_use]
    pub fn snapshot(&self, id: Uuid) -> Option<P> {
        self.lock().get(&id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, P>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P> ProcessStore<P> for InMemoryProcessStore<P>
where
    P: ProcessRecord + Clone + Send + Sync + 'static,
{
    fn find(&self, id: Uuid) -> BoxFuture<'_, Result<Option<P>, ProcessStoreError>> {
        Box::pin(async move { Ok(self.lock().get(&id).cloned()) })
    }

    fn find_by_correlation(
        &self,
        correlation: Uuid,
    ) -> BoxFuture<'_, Result<Option<P>, ProcessStoreError>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .values()
                .find(|process| (self.correlation_of)(process) == Some(correlation))
                .cloned())
        })
    }

    fn save<'a>(&'a self, process: &'a P) -> BoxFuture<'a, Result<(), ProcessStoreError>> {
        Box::pin(async move {
            let id = process.process_id();
            let mut records = self.lock();
            let stored_version = records.get(&id).map_or(0, ProcessRecord::row_version);
            if stored_version != process.row_version() {
                return Err(ProcessStoreError::Concurrency(id));
            }
            let mut updated = process.clone();
            updated.stamp_row_version(stored_version + 1);
            records.insert(id, updated);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Enrollment {
        id: Uuid,
        student: Uuid,
        step: u32,
        row_version: u64,
    }

    impl Enrollment {
        fn new(student: Uuid) -> Self {
            Self {
                id: Uuid::new_v4(),
                student,
                step: 0,
                row_version: 0,
            }
        }
    }

    impl ProcessRecord for Enrollment {
        fn process_id(&self) -> Uuid {
            self.id
        }

        fn row_version(&self) -> u64 {
            self.row_version
        }

        fn stamp_row_version(&mut self, version: u64) {
            self.row_version = version;
        }
    }

    fn store() -> InMemoryProcessStore<Enrollment> {
        InMemoryProcessStore::new(|e: &Enrollment| Some(e.student))
    }

    #[tokio::test]
    async fn save_stamps_the_next_row_version() {
        let store = store();
        let enrollment = Enrollment::new(Uuid::new_v4());
        store.save(&enrollment).await.unwrap();

        let loaded = store.find(enrollment.id).await.unwrap().unwrap();
        assert_eq!(loaded.row_version(), 1);

        store.save(&loaded).await.unwrap();
        let reloaded = store.find(enrollment.id).await.unwrap().unwrap();
        assert_eq!(reloaded.row_version(), 2);
    }

    #[tokio::test]
    async fn find_by_correlation_uses_the_extractor() {
        let store = store();
        let student = Uuid::new_v4();
        let enrollment = Enrollment::new(student);
        store.save(&enrollment).await.unwrap();

        let found = store.find_by_correlation(student).await.unwrap().unwrap();
        assert_eq!(found.id, enrollment.id);
        assert!(store.find_by_correlation(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_save_is_rejected_not_overwritten() {
        let store = store();
        let enrollment = Enrollment::new(Uuid::new_v4());
        store.save(&enrollment).await.unwrap();

        // two hosts load the same record and diverge
        let mut first = store.find(enrollment.id).await.unwrap().unwrap();
        let mut second = first.clone();
        first.step = 1;
        second.step = 2;

        store.save(&first).await.unwrap();
        let result = store.save(&second).await;
        assert!(matches!(
            result,
            Err(ProcessStoreError::Concurrency(id)) if id == enrollment.id
        ));

        // the first writer's transition survives
        assert_eq!(store.snapshot(enrollment.id).unwrap().step, 1);
    }

    #[tokio::test]
    async fn creating_the_same_record_twice_conflicts() {
        let store = store();
        let enrollment = Enrollment::new(Uuid::new_v4());
        store.save(&enrollment).await.unwrap();

        // a second creator still holds version 0
        assert!(matches!(
            store.save(&enrollment).await,
            Err(ProcessStoreError::Concurrency(_))
        ));
    }
}
