//! Consuming boundary: translates bus messages into typed calls.
//!
//! Routing is a match over the message's type metadata; the payload is
//! deserialized into the exact type the metadata names and handed to the
//! process router or the inventory handler. A message that cannot be
//! understood (unknown type, corrupt payload) is dead-lettered and counts
//! as consumed; a handler failure propagates so the transport redelivers.

use crate::commands::RegistrationCommand;
use crate::events::{OrderConfirmed, OrderPlaced, OrderUpdated, PaymentCompleted, SeatsReserved};
use crate::handlers::{HandlerError, SeatsAvailabilityHandler};
use crate::router::{RegistrationProcessRouter, RouterError};
use conference_core::envelope::Envelope;
use conference_core::environment::Clock;
use conference_core::event::{DomainEvent, EventError};
use conference_core::event_bus::BusMessage;
use conference_runtime::dead_letter::DeadLetterQueue;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;

/// Errors from dispatching a consumed message.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The inventory handler failed; the message should be redelivered.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The process router failed; the message should be redelivered.
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Dispatches consumed bus messages for the registration context.
pub struct RegistrationDispatcher {
    router: RegistrationProcessRouter,
    seats_availability: SeatsAvailabilityHandler,
    dead_letters: Arc<DeadLetterQueue>,
    clock: Arc<dyn Clock>,
}

impl RegistrationDispatcher {
    /// A dispatcher over the process router and inventory handler.
    #[must_use]
    pub fn new(
        router: RegistrationProcessRouter,
        seats_availability: SeatsAvailabilityHandler,
        dead_letters: Arc<DeadLetterQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            router,
            seats_availability,
            dead_letters,
            clock,
        }
    }

    /// Dispatch one message by its type metadata.
    ///
    /// Returns `Ok(())` both for handled messages and for dead-lettered
    /// ones; dead-lettering consumes the message.
    ///
    /// # Errors
    ///
    /// [`DispatchError`] when the handler or router failed in a way the
    /// transport should retry by redelivering.
    pub async fn dispatch(&self, message: &BusMessage) -> Result<(), DispatchError> {
        match message.message_type.as_str() {
            "OrderPlaced.v1" => {
                let Some(event) = self.decode::<OrderPlaced>(message) else {
                    return Ok(());
                };
                self.router.route_order_placed(&event).await?;
            }
            "OrderUpdated.v1" => {
                let Some(event) = self.decode::<OrderUpdated>(message) else {
                    return Ok(());
                };
                self.router.route_order_updated(&event).await?;
            }
            "SeatsReserved.v1" => {
                let Some(event) = self.decode::<SeatsReserved>(message) else {
                    return Ok(());
                };
                let mut envelope = Envelope::new(event);
                envelope.correlation_id = message.correlation_id.clone();
                self.router.route_seats_reserved(&envelope).await?;
            }
            "PaymentCompleted.v1" => {
                let Some(event) = self.decode::<PaymentCompleted>(message) else {
                    return Ok(());
                };
                self.router.route_payment_completed(&event).await?;
            }
            "OrderConfirmed.v1" => {
                let Some(event) = self.decode::<OrderConfirmed>(message) else {
                    return Ok(());
                };
                self.router.route_order_confirmed(&event).await?;
            }
            "ExpireRegistrationProcess" => {
                match self.decode_command(message) {
                    Some(RegistrationCommand::ExpireRegistrationProcess(command)) => {
                        self.router.route_expiration(&command).await?;
                    }
                    Some(_) => self.dead_letter(message, "payload does not match type metadata"),
                    None => {}
                }
            }
            "MakeSeatReservation" | "CancelSeatReservation" | "CommitSeatReservation"
            | "AddSeats" | "RemoveSeats" => {
                let Some(command) = self.decode_command(message) else {
                    return Ok(());
                };
                self.seats_availability.handle(&command).await?;
            }
            unknown => {
                self.dead_letter(message, format!("unknown message type {unknown}"));
            }
        }
        Ok(())
    }

    fn decode<E>(&self, message: &BusMessage) -> Option<E>
    where
        E: DomainEvent + DeserializeOwned,
    {
        match E::from_json(&message.body) {
            Ok(event) => Some(event),
            Err(EventError::Deserialization(reason) | EventError::Serialization(reason)) => {
                self.dead_letter(message, reason);
                None
            }
        }
    }

    fn decode_command(&self, message: &BusMessage) -> Option<RegistrationCommand> {
        match serde_json::from_str(&message.body) {
            Ok(command) => Some(command),
            Err(error) => {
                self.dead_letter(message, error.to_string());
                None
            }
        }
    }

    fn dead_letter(&self, message: &BusMessage, reason: impl Into<String>) {
        self.dead_letters
            .push(message.clone(), reason, self.clock.now());
    }
}
