//! Per-order seat assignments.
//!
//! Once an order is confirmed, a `SeatAssignments` aggregate is created with
//! one slot per purchased seat. The slot set is fixed for the aggregate's
//! lifetime; only the attendee occupying each slot changes. Attendee
//! identity is the email address, compared case-insensitively: assigning the
//! same email with a new name is an in-place contact update, assigning a
//! different email hands the seat over (unassign then assign).

use crate::events::{SeatAssignmentsEvent, SeatSlot};
use crate::types::{OrderId, PersonalInfo, SeatQuantity, SeatType};
use conference_core::{EventSourced, SourcedRoot};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors from `SeatAssignments` operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeatAssignmentsError {
    /// The position does not exist in this order.
    #[error("seat position {0} does not exist in this order")]
    UnknownPosition(u32),

    /// An assignment needs a non-empty attendee email.
    #[error("attendee email is required to assign a seat")]
    MissingEmail,
}

/// One slot's current occupancy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatAssignment {
    /// The slot's seat type, fixed at creation.
    pub seat_type: SeatType,
    /// The attendee holding the seat, if any.
    pub attendee: Option<PersonalInfo>,
}

/// Event-sourced seat assignments for one confirmed order.
#[derive(Clone, Debug)]
pub struct SeatAssignments {
    root: SourcedRoot<SeatAssignmentsEvent>,
    seats: HashMap<u32, SeatAssignment>,
}

impl SeatAssignments {
    /// Create the assignments for a confirmed order.
    ///
    /// Expands the ordered `(seat type, quantity)` pairs into individual
    /// slots, 0-indexed and contiguous across all pairs in input order, and
    /// records a single creation event enumerating every slot.
    #[must_use]
    pub fn new(id: Uuid, order_id: OrderId, seats: &[SeatQuantity]) -> Self {
        let mut slots = Vec::new();
        let mut position = 0u32;
        for seat in seats {
            for _ in 0..seat.quantity.max(0) {
                slots.push(SeatSlot {
                    position,
                    seat_type: seat.seat_type,
                });
                position += 1;
            }
        }

        let mut assignments = Self::blank(id);
        assignments.update(SeatAssignmentsEvent::SeatAssignmentsCreated {
            order_id,
            seats: slots,
        });
        assignments
    }

    fn blank(id: Uuid) -> Self {
        Self {
            root: SourcedRoot::new(id),
            seats: HashMap::new(),
        }
    }

    /// Current occupancy per position.
    #[must_use]
    pub const fn seats(&self) -> &HashMap<u32, SeatAssignment> {
        &self.seats
    }

    /// Put an attendee in a seat.
    ///
    /// - empty slot: one assign event
    /// - held by a different email: unassign then assign
    /// - same email, changed name: one contact-update event that keeps the
    ///   seat type and the existing email
    /// - same email and name: nothing (idempotent)
    ///
    /// # Errors
    ///
    /// - [`SeatAssignmentsError::MissingEmail`]: `attendee.email` is empty
    /// - [`SeatAssignmentsError::UnknownPosition`]: no such slot
    pub fn assign_seat(
        &mut self,
        position: u32,
        attendee: &PersonalInfo,
    ) -> Result<(), SeatAssignmentsError> {
        if attendee.email.trim().is_empty() {
            return Err(SeatAssignmentsError::MissingEmail);
        }
        let current = self
            .seats
            .get(&position)
            .ok_or(SeatAssignmentsError::UnknownPosition(position))?;
        let seat_type = current.seat_type;

        match &current.attendee {
            None => {
                self.update(SeatAssignmentsEvent::SeatAssigned {
                    position,
                    seat_type,
                    attendee: attendee.clone(),
                });
            }
            Some(holder) if !holder.same_email(&attendee.email) => {
                self.update(SeatAssignmentsEvent::SeatUnassigned { position });
                self.update(SeatAssignmentsEvent::SeatAssigned {
                    position,
                    seat_type,
                    attendee: attendee.clone(),
                });
            }
            Some(holder) => {
                let name_changed = !holder.first_name.eq_ignore_ascii_case(&attendee.first_name)
                    || !holder.last_name.eq_ignore_ascii_case(&attendee.last_name);
                if name_changed {
                    self.update(SeatAssignmentsEvent::SeatAssignmentUpdated {
                        position,
                        first_name: attendee.first_name.clone(),
                        last_name: attendee.last_name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Free a seat. No-op if the slot is already empty.
    ///
    /// # Errors
    ///
    /// [`SeatAssignmentsError::UnknownPosition`] if no such slot exists.
    pub fn unassign_seat(&mut self, position: u32) -> Result<(), SeatAssignmentsError> {
        let current = self
            .seats
            .get(&position)
            .ok_or(SeatAssignmentsError::UnknownPosition(position))?;
        if current.attendee.is_some() {
            self.update(SeatAssignmentsEvent::SeatUnassigned { position });
        }
        Ok(())
    }
}

impl EventSourced for SeatAssignments {
    type Event = SeatAssignmentsEvent;

    fn root(&self) -> &SourcedRoot<SeatAssignmentsEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut SourcedRoot<SeatAssignmentsEvent> {
        &mut self.root
    }

    fn apply(&mut self, event: &SeatAssignmentsEvent) {
        match event {
            SeatAssignmentsEvent::SeatAssignmentsCreated { seats, .. } => {
                self.seats = seats
                    .iter()
                    .map(|slot| {
                        (
                            slot.position,
                            SeatAssignment {
                                seat_type: slot.seat_type,
                                attendee: None,
                            },
                        )
                    })
                    .collect();
            }
            SeatAssignmentsEvent::SeatAssigned {
                position,
                seat_type,
                attendee,
            } => {
                self.seats.insert(
                    *position,
                    SeatAssignment {
                        seat_type: *seat_type,
                        attendee: Some(attendee.clone()),
                    },
                );
            }
            SeatAssignmentsEvent::SeatUnassigned { position } => {
                if let Some(assignment) = self.seats.get_mut(position) {
                    assignment.attendee = None;
                }
            }
            SeatAssignmentsEvent::SeatAssignmentUpdated {
                position,
                first_name,
                last_name,
            } => {
                if let Some(attendee) = self
                    .seats
                    .get_mut(position)
                    .and_then(|assignment| assignment.attendee.as_mut())
                {
                    attendee.first_name = first_name.clone();
                    attendee.last_name = last_name.clone();
                }
            }
        }
    }
}

impl conference_runtime::repository::Rehydratable for SeatAssignments {
    fn blank(id: Uuid) -> Self {
        Self::blank(id)
    }
}
