//! Event stream versioning.
//!
//! [`Version`] numbers events within one aggregate's stream and drives the
//! optimistic concurrency check at append time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event version number within a single aggregate stream.
///
/// Versions are aggregate-assigned, strictly increasing and contiguous,
/// starting at 0 for the first event an aggregate emits. A freshly
/// constructed aggregate has *no* version yet (`Option<Version>::None`);
/// its first recorded event gets `Version::INITIAL`.
///
/// # Examples
///
/// ```
/// use conference_core::stream::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert_eq!(v1.value(), 1);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of the first event in a stream.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    ///
    /// Uses plain arithmetic; `u64::MAX` events in one stream is not a
    /// realistic concern.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Render the version zero-padded so that row keys sort
    /// lexicographically in version order.
    ///
    /// # Examples
    ///
    /// ```
    /// use conference_core::stream::Version;
    ///
    /// assert_eq!(Version::new(42).padded(), "0000000042");
    /// ```
    #[must_use]
    pub fn padded(self) -> String {
        format!("{:010}", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}
