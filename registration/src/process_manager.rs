//! The registration process manager.
//!
//! Coordinates the multi-step registration transaction across the orders,
//! seats-availability, and payments contexts: reserve seats when an order is
//! placed, confirm the order once payment arrives, commit the reservation on
//! confirmation, and compensate (reject + release) when the payment window
//! lapses.
//!
//! Each handling method returns the envelopes to dispatch instead of
//! mutating a shared outbox; the host delivers every returned envelope after
//! persisting the new state (at-least-once, so downstream handlers must be
//! idempotent).
//!
//! Correlation discipline: every reservation request carries a fresh command
//! id, and only a `SeatsReserved` reply carrying that id (or no id at all)
//! is authoritative. Stale replies from the at-least-once transport are
//! ignored. The scheduled expiration likewise only fires if its command id
//! still matches, so a renewed or completed process shrugs off old timers.

use crate::commands::{
    CancelSeatReservation, CommitSeatReservation, ConfirmOrder, ExpireRegistrationProcess,
    MakeSeatReservation, MarkSeatsAsReserved, RegistrationCommand, RejectOrder,
};
use crate::events::{OrderConfirmed, OrderPlaced, OrderUpdated, PaymentCompleted, SeatsReserved};
use crate::types::{ConferenceId, OrderId, ReservationId};
use chrono::{DateTime, Duration, Utc};
use conference_core::Envelope;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Grace period between the stated reservation expiration and the moment
/// the process actually releases the seats, so a legitimate late
/// confirmation is not raced by the timer.
const EXPIRATION_BUFFER_MINUTES: i64 = 14;

/// Extra life given to the reservation command beyond the payment window.
const RESERVATION_TTL_SLACK_MINUTES: i64 = 1;

/// Where the process currently is in the registration transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Nothing handled yet.
    NotStarted,
    /// A reservation was requested; waiting for `SeatsReserved`.
    AwaitingReservationConfirmation,
    /// Seats are held; waiting for payment.
    ReservationConfirmationReceived,
    /// Payment arrived; waiting for the order to confirm.
    PaymentConfirmationReceived,
}

/// Errors from process manager transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The message is not valid in the process's current state.
    #[error("cannot handle {message} in state {state:?}")]
    InvalidTransition {
        /// What was delivered.
        message: &'static str,
        /// The state it hit.
        state: ProcessState,
    },

    /// Persisted state is missing a field the transition needs.
    #[error("process state is missing {0}")]
    MissingState(&'static str),
}

/// Saga state machine for one registration order.
///
/// Plain persisted state, not event-sourced: the process manager is
/// bookkeeping for an in-flight transaction, and its store (see the runtime
/// crate) saves the whole record conditionally on `row_version`, the
/// optimistic concurrency token the store stamps on every successful save.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationProcessManager {
    id: Uuid,
    conference_id: Option<ConferenceId>,
    order_id: Option<OrderId>,
    reservation_id: Option<ReservationId>,
    seat_reservation_command_id: Option<Uuid>,
    expiration_command_id: Option<Uuid>,
    reservation_auto_expiration: Option<DateTime<Utc>>,
    state: ProcessState,
    completed: bool,
    row_version: u64,
}

impl RegistrationProcessManager {
    /// A process that has not seen any message yet.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self {
            id,
            conference_id: None,
            order_id: None,
            reservation_id: None,
            seat_reservation_command_id: None,
            expiration_command_id: None,
            reservation_auto_expiration: None,
            state: ProcessState::NotStarted,
            completed: false,
            row_version: 0,
        }
    }

    /// The process instance id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The order this process coordinates, once known.
    #[must_use]
    pub const fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    /// Current position in the transaction.
    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether the process reached a terminal outcome.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Command id of the outstanding reservation request, if any.
    #[must_use]
    pub const fn seat_reservation_command_id(&self) -> Option<Uuid> {
        self.seat_reservation_command_id
    }

    /// Command id of the scheduled expiration, if any.
    #[must_use]
    pub const fn expiration_command_id(&self) -> Option<Uuid> {
        self.expiration_command_id
    }

    /// React to a newly placed order.
    ///
    /// With time left in the payment window, requests a seat reservation
    /// (with a time-to-live slightly beyond the window) and schedules the
    /// expiration wake-up with a buffer past the window. With the window
    /// already closed, rejects the order outright.
    ///
    /// # Errors
    ///
    /// [`ProcessError::InvalidTransition`] if the process already started
    /// for a different conference. A replay for the same conference is
    /// ignored.
    pub fn handle_order_placed(
        &mut self,
        event: &OrderPlaced,
        now: DateTime<Utc>,
    ) -> Result<Vec<Envelope<RegistrationCommand>>, ProcessError> {
        if self.state != ProcessState::NotStarted {
            if self.conference_id == Some(event.conference_id) {
                debug!(process_id = %self.id, order_id = %event.order_id, "duplicate OrderPlaced ignored");
                return Ok(Vec::new());
            }
            return Err(self.invalid("OrderPlaced"));
        }

        self.conference_id = Some(event.conference_id);
        self.order_id = Some(event.order_id);
        // The reservation token is derived from the order id so a redelivered
        // OrderPlaced regenerates the same reservation.
        self.reservation_id = Some(ReservationId::from_uuid(event.order_id.as_uuid()));
        self.reservation_auto_expiration = Some(event.reservation_auto_expiration);

        let window = event.reservation_auto_expiration - now;
        if window <= Duration::zero() {
            info!(process_id = %self.id, order_id = %event.order_id, "order placed after its expiration; rejecting");
            self.completed = true;
            return Ok(vec![Envelope::new(RegistrationCommand::RejectOrder(
                RejectOrder {
                    id: Uuid::new_v4(),
                    order_id: event.order_id,
                },
            ))]);
        }

        let reservation = self.reservation_request(event.seats.clone())?;
        let reservation_ttl = (window + Duration::minutes(RESERVATION_TTL_SLACK_MINUTES))
            .to_std()
            .unwrap_or_default();

        let expiration_command_id = Uuid::new_v4();
        self.expiration_command_id = Some(expiration_command_id);
        let expiration_delay = (window + Duration::minutes(EXPIRATION_BUFFER_MINUTES))
            .to_std()
            .unwrap_or_default();
        let expiration = Envelope::new(RegistrationCommand::ExpireRegistrationProcess(
            ExpireRegistrationProcess {
                id: expiration_command_id,
                process_id: self.id,
            },
        ))
        .with_delay(expiration_delay);

        self.state = ProcessState::AwaitingReservationConfirmation;
        Ok(vec![
            reservation.with_time_to_live(reservation_ttl),
            expiration,
        ])
    }

    /// React to the registrant changing the order's seats before paying.
    ///
    /// Issues a fresh reservation request for the new seat list; the new
    /// command id supersedes the old one, so a late reply to the previous
    /// request is ignored.
    ///
    /// # Errors
    ///
    /// [`ProcessError::InvalidTransition`] outside the pre-payment states.
    pub fn handle_order_updated(
        &mut self,
        event: &OrderUpdated,
    ) -> Result<Vec<Envelope<RegistrationCommand>>, ProcessError> {
        match self.state {
            ProcessState::AwaitingReservationConfirmation
            | ProcessState::ReservationConfirmationReceived => {
                let reservation = self.reservation_request(event.seats.clone())?;
                self.state = ProcessState::AwaitingReservationConfirmation;
                Ok(vec![reservation])
            }
            _ => Err(self.invalid("OrderUpdated")),
        }
    }

    /// React to the inventory's reply to a reservation request.
    ///
    /// Only a reply correlated to the outstanding request (or carrying no
    /// correlation at all) is authoritative; a mismatched reply while
    /// waiting is a stale answer to a superseded request and is ignored.
    ///
    /// # Errors
    ///
    /// [`ProcessError::InvalidTransition`] when the reply arrives in a state
    /// that cannot accept it, or repeats with an unknown correlation after
    /// the reservation was already confirmed.
    pub fn handle_seats_reserved(
        &mut self,
        envelope: &Envelope<SeatsReserved>,
    ) -> Result<Vec<Envelope<RegistrationCommand>>, ProcessError> {
        match self.state {
            ProcessState::AwaitingReservationConfirmation => {
                if let Some(correlation_id) = &envelope.correlation_id {
                    if !self.matches_reservation_command(correlation_id) {
                        warn!(
                            process_id = %self.id,
                            correlation_id = %correlation_id,
                            "stale SeatsReserved ignored"
                        );
                        return Ok(Vec::new());
                    }
                }
                self.state = ProcessState::ReservationConfirmationReceived;
                Ok(vec![Envelope::new(RegistrationCommand::MarkSeatsAsReserved(
                    MarkSeatsAsReserved {
                        id: Uuid::new_v4(),
                        order_id: self.order_id.ok_or(ProcessError::MissingState("order id"))?,
                        seats: envelope.body.reservation_details.clone(),
                        expiration: self
                            .reservation_auto_expiration
                            .ok_or(ProcessError::MissingState("reservation expiration"))?,
                    },
                ))])
            }
            ProcessState::ReservationConfirmationReceived
                if envelope
                    .correlation_id
                    .as_deref()
                    .is_some_and(|c| self.matches_reservation_command(c)) =>
            {
                info!(process_id = %self.id, "SeatsReserved already handled");
                Ok(Vec::new())
            }
            _ => Err(self.invalid("SeatsReserved")),
        }
    }

    /// React to a completed payment by asking the order to confirm itself.
    ///
    /// # Errors
    ///
    /// [`ProcessError::InvalidTransition`] unless seats are currently held.
    pub fn handle_payment_completed(
        &mut self,
        _event: &PaymentCompleted,
    ) -> Result<Vec<Envelope<RegistrationCommand>>, ProcessError> {
        if self.state != ProcessState::ReservationConfirmationReceived {
            return Err(self.invalid("PaymentCompleted"));
        }
        self.state = ProcessState::PaymentConfirmationReceived;
        Ok(vec![Envelope::new(RegistrationCommand::ConfirmOrder(
            ConfirmOrder {
                id: Uuid::new_v4(),
                order_id: self.order_id.ok_or(ProcessError::MissingState("order id"))?,
            },
        ))])
    }

    /// React to the order confirming: commit the held seats and finish.
    ///
    /// Also disarms the scheduled expiration; a timer that still fires will
    /// no longer match and is ignored.
    ///
    /// # Errors
    ///
    /// [`ProcessError::InvalidTransition`] before the reservation was
    /// confirmed.
    pub fn handle_order_confirmed(
        &mut self,
        _event: &OrderConfirmed,
    ) -> Result<Vec<Envelope<RegistrationCommand>>, ProcessError> {
        match self.state {
            ProcessState::ReservationConfirmationReceived
            | ProcessState::PaymentConfirmationReceived => {
                self.expiration_command_id = None;
                self.completed = true;
                Ok(vec![Envelope::new(
                    RegistrationCommand::CommitSeatReservation(CommitSeatReservation {
                        id: Uuid::new_v4(),
                        conference_id: self
                            .conference_id
                            .ok_or(ProcessError::MissingState("conference id"))?,
                        reservation_id: self
                            .reservation_id
                            .ok_or(ProcessError::MissingState("reservation id"))?,
                    }),
                )])
            }
            _ => Err(self.invalid("OrderConfirmed")),
        }
    }

    /// React to the scheduled expiration wake-up.
    ///
    /// Fires only if the command id still matches the armed timer;
    /// otherwise the timer is stale (the process renewed it or completed)
    /// and nothing happens. On a match the process compensates: reject the
    /// order and release the held seats.
    ///
    /// # Errors
    ///
    /// [`ProcessError::MissingState`] if the persisted record lost the ids
    /// the compensation commands need.
    pub fn handle_expiration(
        &mut self,
        command: &ExpireRegistrationProcess,
    ) -> Result<Vec<Envelope<RegistrationCommand>>, ProcessError> {
        if self.completed || self.expiration_command_id != Some(command.id) {
            debug!(process_id = %self.id, command_id = %command.id, "stale expiration ignored");
            return Ok(Vec::new());
        }
        self.completed = true;
        Ok(vec![
            Envelope::new(RegistrationCommand::RejectOrder(RejectOrder {
                id: Uuid::new_v4(),
                order_id: self.order_id.ok_or(ProcessError::MissingState("order id"))?,
            })),
            Envelope::new(RegistrationCommand::CancelSeatReservation(
                CancelSeatReservation {
                    id: Uuid::new_v4(),
                    conference_id: self
                        .conference_id
                        .ok_or(ProcessError::MissingState("conference id"))?,
                    reservation_id: self
                        .reservation_id
                        .ok_or(ProcessError::MissingState("reservation id"))?,
                },
            )),
        ])
    }

    fn reservation_request(
        &mut self,
        seats: Vec<crate::types::SeatQuantity>,
    ) -> Result<Envelope<RegistrationCommand>, ProcessError> {
        let command_id = Uuid::new_v4();
        self.seat_reservation_command_id = Some(command_id);
        Ok(Envelope::new(RegistrationCommand::MakeSeatReservation(
            MakeSeatReservation {
                id: command_id,
                conference_id: self
                    .conference_id
                    .ok_or(ProcessError::MissingState("conference id"))?,
                reservation_id: self
                    .reservation_id
                    .ok_or(ProcessError::MissingState("reservation id"))?,
                seats,
            },
        )))
    }

    fn matches_reservation_command(&self, correlation_id: &str) -> bool {
        self.seat_reservation_command_id
            .is_some_and(|id| id.to_string() == correlation_id)
    }

    const fn invalid(&self, message: &'static str) -> ProcessError {
        ProcessError::InvalidTransition {
            message,
            state: self.state,
        }
    }
}

impl conference_runtime::saga::ProcessRecord for RegistrationProcessManager {
    fn process_id(&self) -> Uuid {
        self.id
    }

    fn row_version(&self) -> u64 {
        self.row_version
    }

    fn stamp_row_version(&mut self, version: u64) {
        self.row_version = version;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{SeatQuantity, SeatType};
    use std::time::Duration as StdDuration;

    fn order_placed(now: DateTime<Utc>, minutes_until_expiration: i64) -> OrderPlaced {
        OrderPlaced {
            order_id: OrderId::new(),
            conference_id: ConferenceId::new(),
            seats: vec![SeatQuantity::new(SeatType::new(), 2)],
            reservation_auto_expiration: now + Duration::minutes(minutes_until_expiration),
        }
    }

    fn now() -> DateTime<Utc> {
        "2024-03-01T10:00:00Z".parse().unwrap()
    }

    fn reserved_reply(process: &RegistrationProcessManager) -> Envelope<SeatsReserved> {
        Envelope::new(SeatsReserved {
            reservation_id: ReservationId::new(),
            reservation_details: vec![SeatQuantity::new(SeatType::new(), 2)],
            available_seats_changed: vec![],
        })
        .with_correlation_id(process.seat_reservation_command_id().unwrap().to_string())
    }

    #[test]
    fn order_placed_requests_reservation_and_schedules_expiration() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        let commands = process.handle_order_placed(&order_placed(now, 22), now).unwrap();

        assert_eq!(commands.len(), 2);
        assert!(matches!(
            commands[0].body,
            RegistrationCommand::MakeSeatReservation(_)
        ));
        // time-to-live covers the whole 22-minute window plus slack
        assert!(commands[0].time_to_live.unwrap() > StdDuration::from_secs(22 * 60));

        assert!(matches!(
            commands[1].body,
            RegistrationCommand::ExpireRegistrationProcess(_)
        ));
        // expiration waits out the window plus the 14-minute buffer
        assert!(commands[1].delay.unwrap() > StdDuration::from_secs(32 * 60));

        assert_eq!(process.state(), ProcessState::AwaitingReservationConfirmation);
        assert!(!process.is_completed());
        assert!(process.seat_reservation_command_id().is_some());
        assert!(process.expiration_command_id().is_some());
    }

    #[test]
    fn order_placed_after_expiration_is_rejected_outright() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        let commands = process
            .handle_order_placed(&order_placed(now, -1), now)
            .unwrap();

        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0].body, RegistrationCommand::RejectOrder(_)));
        assert!(process.is_completed());
    }

    #[test]
    fn duplicate_order_placed_is_ignored_but_other_conference_errors() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        let event = order_placed(now, 22);
        process.handle_order_placed(&event, now).unwrap();

        assert!(process.handle_order_placed(&event, now).unwrap().is_empty());

        let mut other = event.clone();
        other.conference_id = ConferenceId::new();
        assert!(matches!(
            process.handle_order_placed(&other, now),
            Err(ProcessError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn mismatched_reservation_reply_is_ignored() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        process.handle_order_placed(&order_placed(now, 22), now).unwrap();

        let stale = reserved_reply(&process).with_correlation_id(Uuid::new_v4().to_string());
        assert!(process.handle_seats_reserved(&stale).unwrap().is_empty());
        assert_eq!(process.state(), ProcessState::AwaitingReservationConfirmation);
    }

    #[test]
    fn uncorrelated_reservation_reply_is_accepted() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        process.handle_order_placed(&order_placed(now, 22), now).unwrap();

        let mut reply = reserved_reply(&process);
        reply.correlation_id = None;
        let commands = process.handle_seats_reserved(&reply).unwrap();
        assert!(matches!(
            commands[0].body,
            RegistrationCommand::MarkSeatsAsReserved(_)
        ));
        assert_eq!(process.state(), ProcessState::ReservationConfirmationReceived);
    }

    #[test]
    fn redelivered_reply_after_confirmation_is_idempotent() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        process.handle_order_placed(&order_placed(now, 22), now).unwrap();
        let reply = reserved_reply(&process);
        process.handle_seats_reserved(&reply).unwrap();

        assert!(process.handle_seats_reserved(&reply).unwrap().is_empty());

        let foreign = reply.with_correlation_id(Uuid::new_v4().to_string());
        assert!(matches!(
            process.handle_seats_reserved(&foreign),
            Err(ProcessError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn order_update_supersedes_the_outstanding_reservation() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        let placed = order_placed(now, 22);
        process.handle_order_placed(&placed, now).unwrap();
        let first_command_id = process.seat_reservation_command_id().unwrap();
        let old_reply = reserved_reply(&process);

        let updated = OrderUpdated {
            order_id: placed.order_id,
            seats: vec![SeatQuantity::new(SeatType::new(), 5)],
        };
        let commands = process.handle_order_updated(&updated).unwrap();
        assert_eq!(commands.len(), 1);
        assert!(matches!(
            commands[0].body,
            RegistrationCommand::MakeSeatReservation(_)
        ));
        assert_ne!(
            process.seat_reservation_command_id().unwrap(),
            first_command_id
        );

        // the reply to the superseded request no longer counts
        assert!(process.handle_seats_reserved(&old_reply).unwrap().is_empty());
        assert_eq!(process.state(), ProcessState::AwaitingReservationConfirmation);
    }

    #[test]
    fn happy_path_emits_commands_in_order_and_completes() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        let placed = order_placed(now, 22);

        let mut kinds = Vec::new();
        for envelope in process.handle_order_placed(&placed, now).unwrap() {
            kinds.push(envelope.body.kind());
        }
        for envelope in process
            .handle_seats_reserved(&reserved_reply(&process))
            .unwrap()
        {
            kinds.push(envelope.body.kind());
        }
        for envelope in process
            .handle_payment_completed(&PaymentCompleted {
                order_id: placed.order_id,
            })
            .unwrap()
        {
            kinds.push(envelope.body.kind());
        }
        for envelope in process
            .handle_order_confirmed(&OrderConfirmed {
                order_id: placed.order_id,
            })
            .unwrap()
        {
            kinds.push(envelope.body.kind());
        }

        assert_eq!(
            kinds,
            vec![
                "MakeSeatReservation",
                "ExpireRegistrationProcess",
                "MarkSeatsAsReserved",
                "ConfirmOrder",
                "CommitSeatReservation",
            ]
        );
        assert!(process.is_completed());
        assert_eq!(process.expiration_command_id(), None);
    }

    #[test]
    fn matching_expiration_compensates_and_completes() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        process.handle_order_placed(&order_placed(now, 22), now).unwrap();

        let wake_up = ExpireRegistrationProcess {
            id: process.expiration_command_id().unwrap(),
            process_id: process.id(),
        };
        let commands = process.handle_expiration(&wake_up).unwrap();
        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0].body, RegistrationCommand::RejectOrder(_)));
        assert!(matches!(
            commands[1].body,
            RegistrationCommand::CancelSeatReservation(_)
        ));
        assert!(process.is_completed());
    }

    #[test]
    fn stale_expiration_is_ignored() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        process.handle_order_placed(&order_placed(now, 22), now).unwrap();

        let stale = ExpireRegistrationProcess {
            id: Uuid::new_v4(),
            process_id: process.id(),
        };
        assert!(process.handle_expiration(&stale).unwrap().is_empty());
        assert!(!process.is_completed());

        // after completion even a matching id no longer fires
        let armed = process.expiration_command_id().unwrap();
        process
            .handle_seats_reserved(&reserved_reply(&process))
            .unwrap();
        process
            .handle_order_confirmed(&OrderConfirmed {
                order_id: process.order_id().unwrap(),
            })
            .unwrap();
        let late = ExpireRegistrationProcess {
            id: armed,
            process_id: process.id(),
        };
        assert!(process.handle_expiration(&late).unwrap().is_empty());
    }

    #[test]
    fn payment_before_reservation_confirmation_is_invalid() {
        let now = now();
        let mut process = RegistrationProcessManager::new(Uuid::new_v4());
        let placed = order_placed(now, 22);
        process.handle_order_placed(&placed, now).unwrap();

        assert!(matches!(
            process.handle_payment_completed(&PaymentCompleted {
                order_id: placed.order_id,
            }),
            Err(ProcessError::InvalidTransition { .. })
        ));
    }
}
