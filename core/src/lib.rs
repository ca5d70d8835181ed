//! # Conference Core
//!
//! Core traits and types for the conference registration event-sourcing
//! runtime.
//!
//! This crate provides the fundamental abstractions shared by the domain and
//! runtime crates:
//!
//! - **Versioned events**: immutable facts stamped with a source id and a
//!   contiguous, aggregate-assigned version ([`event::VersionedEvent`])
//! - **Event-sourced aggregates**: replay-and-append mechanics behind the
//!   [`sourcing::EventSourced`] trait, with optional snapshots via
//!   [`sourcing::MementoOriginator`]
//! - **Event store**: append-only per-aggregate streams with optimistic
//!   concurrency and a durable pending-publish queue
//!   ([`event_store::EventStore`])
//! - **Message bus**: the [`event_bus::MessageSender`] collaborator that the
//!   publisher drains pending events into
//! - **Envelopes**: delivery metadata (message id, correlation id, delay,
//!   time-to-live) wrapped around commands and events
//!   ([`envelope::Envelope`])
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   load / append    ┌─────────────┐
//! │   Command    │◄──────────────────►│ Event store │
//! │   handler    │                    │  (+pending) │
//! └──────┬───────┘                    └──────┬──────┘
//!        │ domain call                       │ drain, in order
//!        ▼                                   ▼
//! ┌──────────────┐  versioned events  ┌─────────────┐
//! │  Aggregate   │───────────────────►│  Publisher  │──► Message bus
//! └──────────────┘                    └─────────────┘
//! ```
//!
//! Events are persisted to the store first (source of truth) and propagated
//! to the bus asynchronously with at-least-once semantics; consumers must be
//! idempotent and use correlation ids to discard duplicates.

pub mod envelope;
pub mod environment;
pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod sourcing;
pub mod stream;

pub use envelope::Envelope;
pub use event::{DomainEvent, EventError, StoredEvent, VersionedEvent};
pub use sourcing::{EventSourced, MementoOriginator, SourcedRoot};
pub use stream::Version;
