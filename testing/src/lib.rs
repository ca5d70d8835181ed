//! # Conference Testing
//!
//! Testing utilities and in-memory doubles for the conference registration
//! runtime:
//!
//! - [`event_store::InMemoryEventStore`]: full event-store contract
//!   (optimistic concurrency, pending queue, paging) over in-process maps
//! - [`message_sender::RecordingMessageSender`]: captures sent messages and
//!   fails on demand
//! - [`process_store::InMemoryProcessStore`]: process manager persistence
//! - [`mocks::FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use conference_testing::test_clock;
//! use conference_core::environment::Clock;
//!
//! let clock = test_clock();
//! assert_eq!(clock.now(), clock.now());
//! ```

pub mod event_store;
pub mod message_sender;
pub mod process_store;

use chrono::{DateTime, Utc};
use conference_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests.
    ///
    /// Always returns the same time, making expiration logic reproducible.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// A clock frozen at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Default fixed clock for tests (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which should never
    /// happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a compact tracing subscriber honoring `RUST_LOG`, once per
/// process. Safe to call from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .compact()
        .try_init();
}

pub use event_store::InMemoryEventStore;
pub use message_sender::RecordingMessageSender;
pub use mocks::{FixedClock, test_clock};
pub use process_store::InMemoryProcessStore;
