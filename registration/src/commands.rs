//! Commands of the registration context.
//!
//! Commands carry their own identity (`id`); the id doubles as the
//! correlation id for any events a handler emits while executing the
//! command, which is how the process manager matches confirmations to the
//! command it sent.

use crate::types::{ConferenceId, OrderId, ReservationId, SeatQuantity, SeatType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserve (or re-reserve with new quantities) seats for a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeSeatReservation {
    /// Command identity.
    pub id: Uuid,
    /// The conference whose inventory is targeted.
    pub conference_id: ConferenceId,
    /// The reservation to create or adjust.
    pub reservation_id: ReservationId,
    /// Requested per-type quantities.
    pub seats: Vec<SeatQuantity>,
}

/// Release a reservation's seats back to the pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSeatReservation {
    /// Command identity.
    pub id: Uuid,
    /// The conference whose inventory is targeted.
    pub conference_id: ConferenceId,
    /// The reservation to cancel.
    pub reservation_id: ReservationId,
}

/// Make a reservation's seats permanently taken.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSeatReservation {
    /// Command identity.
    pub id: Uuid,
    /// The conference whose inventory is targeted.
    pub conference_id: ConferenceId,
    /// The reservation to commit.
    pub reservation_id: ReservationId,
}

/// Tell the order which seats were actually granted and until when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSeatsAsReserved {
    /// Command identity.
    pub id: Uuid,
    /// The order awaiting its reservation.
    pub order_id: OrderId,
    /// Granted per-type quantities.
    pub seats: Vec<SeatQuantity>,
    /// Instant at which the unpaid reservation lapses.
    pub expiration: DateTime<Utc>,
}

/// Reject an order whose reservation expired or could not be made.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectOrder {
    /// Command identity.
    pub id: Uuid,
    /// The order to reject.
    pub order_id: OrderId,
}

/// Confirm an order after its payment completed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    /// Command identity.
    pub id: Uuid,
    /// The order to confirm.
    pub order_id: OrderId,
}

/// Scheduled wake-up telling a process manager its payment window closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireRegistrationProcess {
    /// Command identity. Matched against the process manager's recorded
    /// expiration command id; a stale timer is silently ignored.
    pub id: Uuid,
    /// The process manager instance to wake.
    pub process_id: Uuid,
}

/// Add seats of one type to a conference's inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSeats {
    /// Command identity.
    pub id: Uuid,
    /// The conference whose inventory grows.
    pub conference_id: ConferenceId,
    /// The seat type.
    pub seat_type: SeatType,
    /// Number of seats to add.
    pub quantity: i32,
}

/// Remove seats of one type from a conference's inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveSeats {
    /// Command identity.
    pub id: Uuid,
    /// The conference whose inventory shrinks.
    pub conference_id: ConferenceId,
    /// The seat type.
    pub seat_type: SeatType,
    /// Number of seats to remove.
    pub quantity: i32,
}

/// All commands of the registration context, as one dispatchable sum type.
///
/// Routing is an exhaustive `match` on this enum; an unroutable command is
/// a compile error, not a runtime fault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationCommand {
    /// See [`MakeSeatReservation`].
    MakeSeatReservation(MakeSeatReservation),
    /// See [`CancelSeatReservation`].
    CancelSeatReservation(CancelSeatReservation),
    /// See [`CommitSeatReservation`].
    CommitSeatReservation(CommitSeatReservation),
    /// See [`MarkSeatsAsReserved`].
    MarkSeatsAsReserved(MarkSeatsAsReserved),
    /// See [`RejectOrder`].
    RejectOrder(RejectOrder),
    /// See [`ConfirmOrder`].
    ConfirmOrder(ConfirmOrder),
    /// See [`ExpireRegistrationProcess`].
    ExpireRegistrationProcess(ExpireRegistrationProcess),
    /// See [`AddSeats`].
    AddSeats(AddSeats),
    /// See [`RemoveSeats`].
    RemoveSeats(RemoveSeats),
}

impl RegistrationCommand {
    /// The command's own identity.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::MakeSeatReservation(c) => c.id,
            Self::CancelSeatReservation(c) => c.id,
            Self::CommitSeatReservation(c) => c.id,
            Self::MarkSeatsAsReserved(c) => c.id,
            Self::RejectOrder(c) => c.id,
            Self::ConfirmOrder(c) => c.id,
            Self::ExpireRegistrationProcess(c) => c.id,
            Self::AddSeats(c) => c.id,
            Self::RemoveSeats(c) => c.id,
        }
    }

    /// Stable identifier for logging and transport metadata.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MakeSeatReservation(_) => "MakeSeatReservation",
            Self::CancelSeatReservation(_) => "CancelSeatReservation",
            Self::CommitSeatReservation(_) => "CommitSeatReservation",
            Self::MarkSeatsAsReserved(_) => "MarkSeatsAsReserved",
            Self::RejectOrder(_) => "RejectOrder",
            Self::ConfirmOrder(_) => "ConfirmOrder",
            Self::ExpireRegistrationProcess(_) => "ExpireRegistrationProcess",
            Self::AddSeats(_) => "AddSeats",
            Self::RemoveSeats(_) => "RemoveSeats",
        }
    }
}
