//! Events of the registration context.
//!
//! Two kinds live here: events *emitted* by the aggregates in this crate
//! ([`SeatsAvailabilityEvent`], [`SeatAssignmentsEvent`]) and events
//! *consumed* from neighboring contexts (orders, payments) that drive the
//! registration process manager.
//!
//! Event type identifiers are versioned strings (`"SeatsReserved.v1"`);
//! renaming a Rust variant never changes the wire identifier.

use crate::types::{ConferenceId, OrderId, PersonalInfo, ReservationId, SeatQuantity, SeatType};
use chrono::{DateTime, Utc};
use conference_core::DomainEvent;
use serde::{Deserialize, Serialize};

/// Seats were provisionally taken out of a conference's inventory.
///
/// Emitted by `SeatsAvailability` and consumed by the process manager as
/// the confirmation of its reservation command. `reservation_details`
/// records what the reservation now holds (zero quantities elided);
/// `available_seats_changed` is the signed delta applied to the inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatsReserved {
    /// The reservation this grant belongs to.
    pub reservation_id: ReservationId,
    /// Per-type quantities actually held by the reservation after this
    /// change. Types with a zero quantity are omitted.
    pub reservation_details: Vec<SeatQuantity>,
    /// Signed inventory delta caused by this change.
    pub available_seats_changed: Vec<SeatQuantity>,
}

impl DomainEvent for SeatsReserved {
    fn event_type(&self) -> &'static str {
        "SeatsReserved.v1"
    }
}

/// Events emitted by the `SeatsAvailability` aggregate.
///
/// Internally tagged so a published payload stays decodable as the bare
/// variant body: consumers that already know the event type from the
/// message metadata deserialize the matching struct and ignore the tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SeatsAvailabilityEvent {
    /// Inventory was adjusted (seats added or removed by the organizer).
    AvailableSeatsChanged {
        /// Signed per-type quantity changes.
        seats: Vec<SeatQuantity>,
    },
    /// A reservation was made or adjusted.
    SeatsReserved(SeatsReserved),
    /// A reservation was committed; its seats are permanently taken.
    SeatsReservationCommitted {
        /// The committed reservation.
        reservation_id: ReservationId,
    },
    /// A reservation was cancelled; its seats returned to the pool.
    SeatsReservationCancelled {
        /// The cancelled reservation.
        reservation_id: ReservationId,
        /// Signed inventory delta restoring the released seats.
        available_seats_changed: Vec<SeatQuantity>,
    },
}

impl DomainEvent for SeatsAvailabilityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::AvailableSeatsChanged { .. } => "AvailableSeatsChanged.v1",
            Self::SeatsReserved(event) => event.event_type(),
            Self::SeatsReservationCommitted { .. } => "SeatsReservationCommitted.v1",
            Self::SeatsReservationCancelled { .. } => "SeatsReservationCancelled.v1",
        }
    }
}

/// One purchased seat slot within an order's assignments.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSlot {
    /// Stable position of the slot within the order.
    pub position: u32,
    /// The slot's seat type.
    pub seat_type: SeatType,
}

/// Events emitted by the `SeatAssignments` aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SeatAssignmentsEvent {
    /// The assignments container was created from a confirmed order.
    SeatAssignmentsCreated {
        /// The confirmed order the seats were purchased on.
        order_id: OrderId,
        /// One unassigned slot per purchased seat, positions contiguous
        /// from zero.
        seats: Vec<SeatSlot>,
    },
    /// A slot was assigned to an attendee.
    SeatAssigned {
        /// The slot.
        position: u32,
        /// The slot's seat type.
        seat_type: SeatType,
        /// The attendee now holding the seat.
        attendee: PersonalInfo,
    },
    /// A slot's attendee was removed.
    SeatUnassigned {
        /// The slot.
        position: u32,
    },
    /// The attendee's contact details changed without changing identity.
    SeatAssignmentUpdated {
        /// The slot.
        position: u32,
        /// Updated given name.
        first_name: String,
        /// Updated family name.
        last_name: String,
    },
}

impl DomainEvent for SeatAssignmentsEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::SeatAssignmentsCreated { .. } => "SeatAssignmentsCreated.v1",
            Self::SeatAssigned { .. } => "SeatAssigned.v1",
            Self::SeatUnassigned { .. } => "SeatUnassigned.v1",
            Self::SeatAssignmentUpdated { .. } => "SeatAssignmentUpdated.v1",
        }
    }
}

/// A registrant placed an order (emitted by the orders context).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    /// The new order.
    pub order_id: OrderId,
    /// The conference the order is for.
    pub conference_id: ConferenceId,
    /// Requested per-type quantities.
    pub seats: Vec<SeatQuantity>,
    /// Instant at which an unpaid reservation lapses.
    pub reservation_auto_expiration: DateTime<Utc>,
}

impl DomainEvent for OrderPlaced {
    fn event_type(&self) -> &'static str {
        "OrderPlaced.v1"
    }
}

/// The registrant changed an order's seats before paying.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdated {
    /// The changed order.
    pub order_id: OrderId,
    /// The full new set of requested quantities.
    pub seats: Vec<SeatQuantity>,
}

impl DomainEvent for OrderUpdated {
    fn event_type(&self) -> &'static str {
        "OrderUpdated.v1"
    }
}

/// The order was confirmed (emitted by the orders context).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    /// The confirmed order.
    pub order_id: OrderId,
}

impl DomainEvent for OrderConfirmed {
    fn event_type(&self) -> &'static str {
        "OrderConfirmed.v1"
    }
}

/// Payment for an order succeeded (emitted by the payments context).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    /// The order the payment was for.
    pub order_id: OrderId,
}

impl DomainEvent for PaymentCompleted {
    fn event_type(&self) -> &'static str {
        "PaymentCompleted.v1"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_type_is_stable_per_variant() {
        let event = SeatsAvailabilityEvent::SeatsReserved(SeatsReserved {
            reservation_id: ReservationId::new(),
            reservation_details: vec![],
            available_seats_changed: vec![],
        });
        assert_eq!(event.event_type(), "SeatsReserved.v1");

        let event = SeatAssignmentsEvent::SeatUnassigned { position: 3 };
        assert_eq!(event.event_type(), "SeatUnassigned.v1");
    }

    #[test]
    fn seats_reserved_roundtrips_through_json() {
        let seat_type = SeatType::new();
        let event = SeatsAvailabilityEvent::SeatsReserved(SeatsReserved {
            reservation_id: ReservationId::new(),
            reservation_details: vec![SeatQuantity::new(seat_type, 4)],
            available_seats_changed: vec![SeatQuantity::new(seat_type, -4)],
        });
        let json = event.to_json().unwrap();
        let back = SeatsAvailabilityEvent::from_json(&json).unwrap();
        assert_eq!(back, event);

        // consumers decode the bare variant body, ignoring the tag
        let bare = SeatsReserved::from_json(&json).unwrap();
        assert!(matches!(event, SeatsAvailabilityEvent::SeatsReserved(inner) if inner == bare));
    }
}
