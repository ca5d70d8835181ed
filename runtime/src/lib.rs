//! # Conference Runtime
//!
//! Runtime services tying the domain to storage and transport:
//!
//! - [`repository`]: load-modify-save cycles over event-sourced aggregates,
//!   with optional snapshot caching
//! - [`publisher`]: the reliable event publisher draining the store's
//!   pending-event queue to the message bus, per-partition and in order
//! - [`throttling`]: the adaptive concurrency gate protecting the transport
//!   from bursty publish fan-out
//! - [`retry`]: exponential backoff schedules for optimistic-concurrency
//!   and transient-transport retries
//! - [`saga`]: the persistence contract for process managers
//! - [`dead_letter`]: bounded retention of undeliverable messages

pub mod dead_letter;
pub mod publisher;
pub mod repository;
pub mod retry;
pub mod saga;
pub mod throttling;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use publisher::{EventStoreBusPublisher, PendingEventsNotifier, PublisherError};
pub use repository::{EventSourcedRepository, Rehydratable, SnapshottingRepository};
pub use retry::RetryPolicy;
pub use saga::{ProcessRecord, ProcessStore, ProcessStoreError};
pub use throttling::{DynamicThrottling, DynamicThrottlingConfig};
