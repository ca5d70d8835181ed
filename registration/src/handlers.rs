//! Command handlers for the registration aggregates.
//!
//! A handler owns one aggregate type's load-modify-save cycle. Events saved
//! while executing a command are stamped with the command's id as their
//! correlation id, which is how the process manager later matches a
//! `SeatsReserved` reply to the request that caused it.
//!
//! The seats-availability aggregate is highly contended, so its handler
//! retries the whole cycle on an optimistic-concurrency conflict, with
//! jittered backoff between attempts.

use crate::commands::RegistrationCommand;
use crate::seat_assignments::{SeatAssignments, SeatAssignmentsError};
use crate::seats_availability::{SeatsAvailability, SeatsAvailabilityError};
use crate::types::{OrderId, PersonalInfo, SeatQuantity};
use conference_core::EventSourced;
use conference_core::event_store::{EventStore, EventStoreError};
use conference_runtime::publisher::PendingEventsNotifier;
use conference_runtime::repository::{EventSourcedRepository, SnapshottingRepository};
use conference_runtime::retry::RetryPolicy;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Errors from command handling.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Loading or saving the aggregate failed.
    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// The inventory rejected the operation.
    #[error(transparent)]
    SeatsAvailability(#[from] SeatsAvailabilityError),

    /// The assignments aggregate rejected the operation.
    #[error(transparent)]
    SeatAssignments(#[from] SeatAssignmentsError),

    /// The command is not addressed to this handler.
    #[error("no handler for command {0}")]
    NotHandled(&'static str),
}

/// Executes inventory commands against `SeatsAvailability`.
pub struct SeatsAvailabilityHandler {
    repository: SnapshottingRepository<SeatsAvailability>,
    retry: RetryPolicy,
}

impl SeatsAvailabilityHandler {
    /// A handler over the given store, snapshotting between commands.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            repository: SnapshottingRepository::new(store),
            retry: RetryPolicy::new(3),
        }
    }

    /// Override the concurrency-conflict retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Nudge this publisher after every save, so events this handler
    /// appends are published without waiting for a startup scan.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn PendingEventsNotifier>) -> Self {
        self.repository = self.repository.with_publisher(publisher);
        self
    }

    /// Execute one command, retrying the whole load-modify-save cycle on an
    /// optimistic-concurrency conflict.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::NotHandled`]: the command targets another handler
    /// - [`HandlerError::SeatsAvailability`]: domain rejection
    /// - [`HandlerError::Store`]: persistence failure, including a conflict
    ///   that survived the retry budget
    pub async fn handle(&self, command: &RegistrationCommand) -> Result<(), HandlerError> {
        let mut attempt = 0;
        loop {
            match self.execute(command).await {
                Err(HandlerError::Store(error))
                    if error.is_concurrency_conflict() && attempt < self.retry.max_attempts() =>
                {
                    attempt += 1;
                    debug!(kind = command.kind(), attempt, "concurrency conflict, retrying");
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
                outcome => return outcome,
            }
        }
    }

    async fn execute(&self, command: &RegistrationCommand) -> Result<(), HandlerError> {
        match command {
            RegistrationCommand::MakeSeatReservation(c) => {
                let mut availability = self.repository.get(c.conference_id.as_uuid()).await?;
                availability.make_reservation(c.reservation_id, &c.seats)?;
                self.save(&availability, c.id).await
            }
            RegistrationCommand::CancelSeatReservation(c) => {
                let mut availability = self.repository.get(c.conference_id.as_uuid()).await?;
                availability.cancel_reservation(c.reservation_id);
                self.save(&availability, c.id).await
            }
            RegistrationCommand::CommitSeatReservation(c) => {
                let mut availability = self.repository.get(c.conference_id.as_uuid()).await?;
                availability.commit_reservation(c.reservation_id);
                self.save(&availability, c.id).await
            }
            RegistrationCommand::AddSeats(c) => {
                // inventory adjustments may arrive before any other event
                // touched the conference, so create on first contact
                let mut availability = self
                    .repository
                    .find(c.conference_id.as_uuid())
                    .await?
                    .unwrap_or_else(|| SeatsAvailability::new(c.conference_id));
                availability.add_seats(c.seat_type, c.quantity);
                self.save(&availability, c.id).await
            }
            RegistrationCommand::RemoveSeats(c) => {
                let mut availability = self
                    .repository
                    .find(c.conference_id.as_uuid())
                    .await?
                    .unwrap_or_else(|| SeatsAvailability::new(c.conference_id));
                availability.remove_seats(c.seat_type, c.quantity);
                self.save(&availability, c.id).await
            }
            other => Err(HandlerError::NotHandled(other.kind())),
        }
    }

    async fn save(
        &self,
        availability: &SeatsAvailability,
        command_id: Uuid,
    ) -> Result<(), HandlerError> {
        self.repository
            .save(availability, Some(&command_id.to_string()))
            .await?;
        Ok(())
    }
}

/// Manages `SeatAssignments` instances for confirmed orders.
pub struct SeatAssignmentsHandler {
    repository: EventSourcedRepository<SeatAssignments>,
}

impl SeatAssignmentsHandler {
    /// A handler over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            repository: EventSourcedRepository::new(store),
        }
    }

    /// Nudge this publisher after every save, so events this handler
    /// appends are published without waiting for a startup scan.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn PendingEventsNotifier>) -> Self {
        self.repository = self.repository.with_publisher(publisher);
        self
    }

    /// Create the assignments aggregate for a confirmed order and return
    /// its id.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Store`] if the creation event cannot be persisted.
    pub async fn create_for_order(
        &self,
        order_id: OrderId,
        seats: &[SeatQuantity],
    ) -> Result<Uuid, HandlerError> {
        let assignments = SeatAssignments::new(Uuid::new_v4(), order_id, seats);
        self.repository.save(&assignments, None).await?;
        Ok(assignments.id())
    }

    /// Put an attendee in a seat.
    ///
    /// # Errors
    ///
    /// [`HandlerError::SeatAssignments`] on a domain rejection,
    /// [`HandlerError::Store`] on persistence failure.
    pub async fn assign_seat(
        &self,
        assignments_id: Uuid,
        position: u32,
        attendee: &PersonalInfo,
    ) -> Result<(), HandlerError> {
        let mut assignments = self.repository.get(assignments_id).await?;
        assignments.assign_seat(position, attendee)?;
        self.repository.save(&assignments, None).await?;
        Ok(())
    }

    /// Free a seat.
    ///
    /// # Errors
    ///
    /// [`HandlerError::SeatAssignments`] on a domain rejection,
    /// [`HandlerError::Store`] on persistence failure.
    pub async fn unassign_seat(
        &self,
        assignments_id: Uuid,
        position: u32,
    ) -> Result<(), HandlerError> {
        let mut assignments = self.repository.get(assignments_id).await?;
        assignments.unassign_seat(position)?;
        self.repository.save(&assignments, None).await?;
        Ok(())
    }
}
