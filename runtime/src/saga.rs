//! Persistence contract for process managers.
//!
//! A process manager is plain persisted state (not an event stream): the
//! store saves the whole record with an optimistic version check and can
//! look an instance up by the business correlation key its messages carry
//! (for the registration process, the order id).
//!
//! The host protocol is: load (or create), call the handling method, save
//! the new state, then dispatch the envelopes the method returned. Dispatch
//! after persist gives at-least-once command delivery; a crash between the
//! two re-sends on recovery, so command recipients must be idempotent.

use conference_core::event_store::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

/// Identity and row version of a persistable process record.
///
/// The row version is the optimistic concurrency token: `find` returns the
/// record stamped with its stored version, `save` rejects a record whose
/// version no longer matches the stored one, and a successful save stamps
/// the next version. A never-persisted instance carries version 0.
pub trait ProcessRecord {
    /// The instance id the record is keyed by.
    fn process_id(&self) -> Uuid;

    /// The record's version as loaded; 0 if never persisted.
    fn row_version(&self) -> u64;

    /// Stamp the version the store assigned on a successful save.
    fn stamp_row_version(&mut self, version: u64);
}

/// Errors from process state persistence.
#[derive(Error, Debug, Clone)]
pub enum ProcessStoreError {
    /// Another host saved the process since this one loaded it. Reload and
    /// re-handle the message.
    #[error("concurrent update of process {0}")]
    Concurrency(Uuid),

    /// Underlying storage failed.
    #[error("process storage error: {0}")]
    Storage(String),
}

/// Stores process manager instances of type `P`.
pub trait ProcessStore<P>: Send + Sync {
    /// Look up a process by its instance id.
    ///
    /// # Errors
    ///
    /// [`ProcessStoreError::Storage`] on read failure.
    fn find(&self, id: Uuid) -> BoxFuture<'_, Result<Option<P>, ProcessStoreError>>;

    /// Look up the process correlated to a business key (e.g. the order id
    /// of a registration).
    ///
    /// # Errors
    ///
    /// [`ProcessStoreError::Storage`] on read failure.
    fn find_by_correlation(
        &self,
        correlation: Uuid,
    ) -> BoxFuture<'_, Result<Option<P>, ProcessStoreError>>;

    /// Persist the process state.
    ///
    /// The save is conditional on the record's row version (see
    /// [`ProcessRecord`]): a writer holding a stale version is rejected and
    /// must reload and re-handle its message.
    ///
    /// # Errors
    ///
    /// - [`ProcessStoreError::Concurrency`]: the record moved since load
    /// - [`ProcessStoreError::Storage`]: the write failed
    fn save<'a>(&'a self, process: &'a P) -> BoxFuture<'a, Result<(), ProcessStoreError>>;
}
