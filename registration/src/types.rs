//! Domain identifiers and value objects for the registration context.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(Uuid);

        impl $name {
            /// Create a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing identifier.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id! {
    /// Identifies a conference; also the id of its `SeatsAvailability`
    /// aggregate (one instance per conference).
    ConferenceId
}

uuid_id! {
    /// Identifies a registration order placed by a registrant.
    OrderId
}

uuid_id! {
    /// Opaque token identifying a seat reservation request. Not an
    /// aggregate id; the process manager derives it from the order id.
    ReservationId
}

uuid_id! {
    /// Identifies a seat type (e.g. "full conference pass") within a
    /// conference.
    SeatType
}

/// A quantity of seats of one type.
///
/// Quantities are signed: inventory adjustments and availability diffs use
/// negative values for removals.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatQuantity {
    /// The seat type.
    pub seat_type: SeatType,
    /// Signed quantity.
    pub quantity: i32,
}

impl SeatQuantity {
    /// Pair a seat type with a quantity.
    #[must_use]
    pub const fn new(seat_type: SeatType, quantity: i32) -> Self {
        Self { seat_type, quantity }
    }
}

/// Attendee contact details attached to an assigned seat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalInfo {
    /// Attendee email; the identity an assignment is keyed on.
    pub email: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
}

impl PersonalInfo {
    /// Build attendee details.
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// Case-insensitive email identity comparison.
    #[must_use]
    pub fn same_email(&self, other: &str) -> bool {
        self.email.eq_ignore_ascii_case(other)
    }
}
