//! Seat-inventory ledger for one conference.
//!
//! `SeatsAvailability` tracks how many seats of each type remain and which
//! reservations currently hold seats. It is the most contended aggregate in
//! the system (every concurrent registrant for a conference writes to the
//! same stream), so callers rely on the store's optimistic-concurrency check
//! and retry the whole load-modify-save cycle on conflict rather than
//! locking.
//!
//! Negative remaining totals are permitted: inventory adjustments come from
//! the seat-type authority upstream, and this ledger does not clamp at zero
//! when seats are removed below what is already reserved.

use crate::events::{SeatsAvailabilityEvent, SeatsReserved};
use crate::types::{ConferenceId, ReservationId, SeatQuantity, SeatType};
use conference_core::{EventSourced, MementoOriginator, SourcedRoot, Version};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors from `SeatsAvailability` operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeatsAvailabilityError {
    /// A reservation asked for a seat type this conference has never added.
    #[error("seat type {0} was never added to this conference")]
    UnknownSeatType(SeatType),
}

/// Event-sourced seat inventory for one conference.
#[derive(Clone, Debug)]
pub struct SeatsAvailability {
    root: SourcedRoot<SeatsAvailabilityEvent>,
    remaining_seats: HashMap<SeatType, i32>,
    pending_reservations: HashMap<ReservationId, Vec<SeatQuantity>>,
}

/// Snapshot of a [`SeatsAvailability`] instance.
///
/// Read-only after creation; restoring always copies the maps so in-flight
/// instances never share state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeatsAvailabilityMemento {
    version: Option<Version>,
    remaining_seats: HashMap<SeatType, i32>,
    pending_reservations: HashMap<ReservationId, Vec<SeatQuantity>>,
}

impl SeatsAvailability {
    /// Fresh inventory for a conference, with no seats and no history.
    #[must_use]
    pub fn new(conference_id: ConferenceId) -> Self {
        Self::blank(conference_id.as_uuid())
    }

    fn blank(id: Uuid) -> Self {
        Self {
            root: SourcedRoot::new(id),
            remaining_seats: HashMap::new(),
            pending_reservations: HashMap::new(),
        }
    }

    /// Remaining seats per type. May be negative when the upstream
    /// authority removed more seats than were still free.
    #[must_use]
    pub const fn remaining_seats(&self) -> &HashMap<SeatType, i32> {
        &self.remaining_seats
    }

    /// Reservations currently holding seats.
    #[must_use]
    pub const fn pending_reservations(&self) -> &HashMap<ReservationId, Vec<SeatQuantity>> {
        &self.pending_reservations
    }

    /// Add seats of one type to the pool.
    pub fn add_seats(&mut self, seat_type: SeatType, quantity: i32) {
        self.update(SeatsAvailabilityEvent::AvailableSeatsChanged {
            seats: vec![SeatQuantity::new(seat_type, quantity)],
        });
    }

    /// Remove seats of one type from the pool. The total may go negative.
    pub fn remove_seats(&mut self, seat_type: SeatType, quantity: i32) {
        self.update(SeatsAvailabilityEvent::AvailableSeatsChanged {
            seats: vec![SeatQuantity::new(seat_type, -quantity)],
        });
    }

    /// Make or adjust a reservation.
    ///
    /// Idempotent upsert per reservation id: re-invoking with different
    /// wanted quantities produces an incremental adjustment against what the
    /// reservation already holds, without cancelling first. For each seat
    /// type the granted quantity is
    /// `min(wanted, max(remaining, 0) + already_held)`, so a reservation can
    /// get fewer seats than asked for but never loses seats it holds to
    /// other reservations.
    ///
    /// # Errors
    ///
    /// [`SeatsAvailabilityError::UnknownSeatType`] if any wanted seat type
    /// was never added via [`Self::add_seats`]. Nothing is emitted.
    pub fn make_reservation(
        &mut self,
        reservation_id: ReservationId,
        wanted: &[SeatQuantity],
    ) -> Result<(), SeatsAvailabilityError> {
        if let Some(missing) = wanted
            .iter()
            .find(|seat| !self.remaining_seats.contains_key(&seat.seat_type))
        {
            return Err(SeatsAvailabilityError::UnknownSeatType(missing.seat_type));
        }

        let held = self
            .pending_reservations
            .get(&reservation_id)
            .cloned()
            .unwrap_or_default();

        // Diff over the union of wanted and already-held seat types, so a
        // type dropped from the cart is released.
        let mut seat_types: Vec<SeatType> = wanted.iter().map(|seat| seat.seat_type).collect();
        for seat in &held {
            if !seat_types.contains(&seat.seat_type) {
                seat_types.push(seat.seat_type);
            }
        }

        let mut reservation_details = Vec::new();
        let mut available_seats_changed = Vec::new();
        for seat_type in seat_types {
            let wanted_qty = quantity_of(wanted, seat_type);
            let held_qty = quantity_of(&held, seat_type);
            let remaining = self.remaining_seats.get(&seat_type).copied().unwrap_or(0);
            let actual = wanted_qty.min(remaining.max(0) + held_qty);
            if actual != 0 {
                reservation_details.push(SeatQuantity::new(seat_type, actual));
            }
            let delta = actual - held_qty;
            if delta != 0 {
                available_seats_changed.push(SeatQuantity::new(seat_type, -delta));
            }
        }

        self.update(SeatsAvailabilityEvent::SeatsReserved(SeatsReserved {
            reservation_id,
            reservation_details,
            available_seats_changed,
        }));
        Ok(())
    }

    /// Release a reservation's seats back to the pool. No-op for an unknown
    /// reservation id.
    pub fn cancel_reservation(&mut self, reservation_id: ReservationId) {
        let Some(held) = self.pending_reservations.get(&reservation_id).cloned() else {
            return;
        };
        self.update(SeatsAvailabilityEvent::SeatsReservationCancelled {
            reservation_id,
            available_seats_changed: held,
        });
    }

    /// Make a reservation permanent. No-op for an unknown reservation id.
    ///
    /// The seats were already deducted from the pool at reservation time;
    /// committing only drops the hold-tracking entry.
    pub fn commit_reservation(&mut self, reservation_id: ReservationId) {
        if !self.pending_reservations.contains_key(&reservation_id) {
            return;
        }
        self.update(SeatsAvailabilityEvent::SeatsReservationCommitted { reservation_id });
    }
}

fn quantity_of(seats: &[SeatQuantity], seat_type: SeatType) -> i32 {
    seats
        .iter()
        .find(|seat| seat.seat_type == seat_type)
        .map_or(0, |seat| seat.quantity)
}

impl EventSourced for SeatsAvailability {
    type Event = SeatsAvailabilityEvent;

    fn root(&self) -> &SourcedRoot<SeatsAvailabilityEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut SourcedRoot<SeatsAvailabilityEvent> {
        &mut self.root
    }

    fn apply(&mut self, event: &SeatsAvailabilityEvent) {
        match event {
            SeatsAvailabilityEvent::AvailableSeatsChanged { seats } => {
                for seat in seats {
                    *self.remaining_seats.entry(seat.seat_type).or_insert(0) += seat.quantity;
                }
            }
            SeatsAvailabilityEvent::SeatsReserved(reserved) => {
                if reserved.reservation_details.is_empty() {
                    self.pending_reservations.remove(&reserved.reservation_id);
                } else {
                    self.pending_reservations.insert(
                        reserved.reservation_id,
                        reserved.reservation_details.clone(),
                    );
                }
                for seat in &reserved.available_seats_changed {
                    *self.remaining_seats.entry(seat.seat_type).or_insert(0) += seat.quantity;
                }
            }
            SeatsAvailabilityEvent::SeatsReservationCommitted { reservation_id } => {
                self.pending_reservations.remove(reservation_id);
            }
            SeatsAvailabilityEvent::SeatsReservationCancelled {
                reservation_id,
                available_seats_changed,
            } => {
                self.pending_reservations.remove(reservation_id);
                for seat in available_seats_changed {
                    *self.remaining_seats.entry(seat.seat_type).or_insert(0) += seat.quantity;
                }
            }
        }
    }
}

impl conference_runtime::repository::Rehydratable for SeatsAvailability {
    fn blank(id: Uuid) -> Self {
        Self::blank(id)
    }
}

impl MementoOriginator for SeatsAvailability {
    type Memento = SeatsAvailabilityMemento;

    fn save_to_memento(&self) -> SeatsAvailabilityMemento {
        SeatsAvailabilityMemento {
            version: self.version(),
            remaining_seats: self.remaining_seats.clone(),
            pending_reservations: self.pending_reservations.clone(),
        }
    }

    fn from_memento(id: Uuid, memento: &SeatsAvailabilityMemento) -> Self {
        let root = match memento.version {
            Some(version) => SourcedRoot::at_version(id, version),
            None => SourcedRoot::new(id),
        };
        Self {
            root,
            remaining_seats: memento.remaining_seats.clone(),
            pending_reservations: memento.pending_reservations.clone(),
        }
    }
}
