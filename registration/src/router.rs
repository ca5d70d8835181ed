//! Host for the registration process manager.
//!
//! The router owns the saga's load-handle-save-dispatch cycle: it finds the
//! process instance a message is correlated to (creating one on the first
//! `OrderPlaced`), invokes the handling method, persists the new state, and
//! only then sends the returned command envelopes to the bus. Persist-first
//! gives at-least-once command delivery: a crash between the save and the
//! sends replays the message and re-sends, so command recipients are
//! idempotent.
//!
//! Saves are version-checked; when a competing host saved the process first,
//! the router reloads and re-handles the message against the fresh state
//! rather than overwrite the other host's transition.

use crate::commands::{ExpireRegistrationProcess, RegistrationCommand};
use crate::events::{OrderConfirmed, OrderPlaced, OrderUpdated, PaymentCompleted, SeatsReserved};
use crate::process_manager::{ProcessError, RegistrationProcessManager};
use conference_core::Envelope;
use conference_core::environment::Clock;
use conference_core::event_bus::{BusMessage, MessageSender, MessageSenderError};
use conference_runtime::saga::{ProcessStore, ProcessStoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Save attempts before a persistent concurrency conflict is surfaced.
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// Errors from routing a message to the process manager.
#[derive(Error, Debug)]
pub enum RouterError {
    /// The process rejected the message in its current state.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Process persistence failed.
    #[error(transparent)]
    Store(#[from] ProcessStoreError),

    /// An outbound command could not be handed to the bus.
    #[error(transparent)]
    Send(#[from] MessageSenderError),

    /// No process exists for the message's correlation key. Retryable: the
    /// message may simply have overtaken the one that creates the process.
    #[error("no registration process correlated to {0}")]
    ProcessNotFound(Uuid),

    /// An outbound command could not be serialized.
    #[error("failed to serialize command: {0}")]
    Serialization(String),
}

/// Routes registration messages to their process manager instance.
pub struct RegistrationProcessRouter {
    store: Arc<dyn ProcessStore<RegistrationProcessManager>>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn Clock>,
}

impl RegistrationProcessRouter {
    /// A router over the given process store, bus sender, and clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn ProcessStore<RegistrationProcessManager>>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sender,
            clock,
        }
    }

    /// Route an `OrderPlaced` event, creating the process on first sight.
    ///
    /// # Errors
    ///
    /// See [`RouterError`].
    pub async fn route_order_placed(&self, event: &OrderPlaced) -> Result<(), RouterError> {
        let mut attempt = 0;
        loop {
            let mut process = self
                .store
                .find_by_correlation(event.order_id.as_uuid())
                .await?
                .unwrap_or_else(|| RegistrationProcessManager::new(Uuid::new_v4()));
            let commands = process.handle_order_placed(event, self.clock.now())?;
            match self.persist_and_dispatch(&process, commands).await {
                Err(error) if retryable(&error, &mut attempt) => {}
                outcome => return outcome,
            }
        }
    }

    /// Route an `OrderUpdated` event.
    ///
    /// # Errors
    ///
    /// See [`RouterError`].
    pub async fn route_order_updated(&self, event: &OrderUpdated) -> Result<(), RouterError> {
        self.route_correlated(event.order_id.as_uuid(), |process| {
            process.handle_order_updated(event)
        })
        .await
    }

    /// Route a `SeatsReserved` reply; its envelope carries the correlation
    /// id of the reservation command it answers.
    ///
    /// # Errors
    ///
    /// See [`RouterError`].
    pub async fn route_seats_reserved(
        &self,
        envelope: &Envelope<SeatsReserved>,
    ) -> Result<(), RouterError> {
        // the reservation token is derived from the order id, so it doubles
        // as the correlation key
        self.route_correlated(envelope.body.reservation_id.as_uuid(), |process| {
            process.handle_seats_reserved(envelope)
        })
        .await
    }

    /// Route a `PaymentCompleted` event.
    ///
    /// # Errors
    ///
    /// See [`RouterError`].
    pub async fn route_payment_completed(
        &self,
        event: &PaymentCompleted,
    ) -> Result<(), RouterError> {
        self.route_correlated(event.order_id.as_uuid(), |process| {
            process.handle_payment_completed(event)
        })
        .await
    }

    /// Route an `OrderConfirmed` event.
    ///
    /// # Errors
    ///
    /// See [`RouterError`].
    pub async fn route_order_confirmed(&self, event: &OrderConfirmed) -> Result<(), RouterError> {
        self.route_correlated(event.order_id.as_uuid(), |process| {
            process.handle_order_confirmed(event)
        })
        .await
    }

    /// Route a scheduled expiration wake-up. A timer whose process no
    /// longer exists is stale and ignored.
    ///
    /// # Errors
    ///
    /// See [`RouterError`].
    pub async fn route_expiration(
        &self,
        command: &ExpireRegistrationProcess,
    ) -> Result<(), RouterError> {
        let mut attempt = 0;
        loop {
            let Some(mut process) = self.store.find(command.process_id).await? else {
                debug!(process_id = %command.process_id, "expiration for unknown process ignored");
                return Ok(());
            };
            let commands = process.handle_expiration(command)?;
            match self.persist_and_dispatch(&process, commands).await {
                Err(error) if retryable(&error, &mut attempt) => {}
                outcome => return outcome,
            }
        }
    }

    /// Load-handle-save for an existing process, re-handling against fresh
    /// state when a competing host's save wins the version check.
    async fn route_correlated<H>(&self, correlation: Uuid, handle: H) -> Result<(), RouterError>
    where
        H: Fn(
            &mut RegistrationProcessManager,
        ) -> Result<Vec<Envelope<RegistrationCommand>>, ProcessError>,
    {
        let mut attempt = 0;
        loop {
            let mut process = self.correlated(correlation).await?;
            let commands = handle(&mut process)?;
            match self.persist_and_dispatch(&process, commands).await {
                Err(error) if retryable(&error, &mut attempt) => {}
                outcome => return outcome,
            }
        }
    }

    async fn correlated(
        &self,
        correlation: Uuid,
    ) -> Result<RegistrationProcessManager, RouterError> {
        match self.store.find_by_correlation(correlation).await? {
            Some(process) => Ok(process),
            None => {
                warn!(%correlation, "message for a process that does not exist yet");
                Err(RouterError::ProcessNotFound(correlation))
            }
        }
    }

    async fn persist_and_dispatch(
        &self,
        process: &RegistrationProcessManager,
        commands: Vec<Envelope<RegistrationCommand>>,
    ) -> Result<(), RouterError> {
        self.store.save(process).await?;
        for envelope in commands {
            debug!(
                process_id = %process.id(),
                kind = envelope.body.kind(),
                "dispatching saga command"
            );
            self.sender.send(to_bus_message(&envelope)?).await?;
        }
        Ok(())
    }
}

/// Whether the routing cycle should reload and re-handle after this error.
fn retryable(error: &RouterError, attempt: &mut u32) -> bool {
    if let RouterError::Store(ProcessStoreError::Concurrency(id)) = error {
        if *attempt < MAX_SAVE_ATTEMPTS {
            *attempt += 1;
            warn!(process_id = %id, attempt = *attempt, "process save conflicted, re-handling");
            return true;
        }
    }
    false
}

fn to_bus_message(envelope: &Envelope<RegistrationCommand>) -> Result<BusMessage, RouterError> {
    Ok(BusMessage {
        body: serde_json::to_string(&envelope.body)
            .map_err(|e| RouterError::Serialization(e.to_string()))?,
        message_id: envelope.message_id.to_string(),
        session_id: None,
        // the command's own id correlates any events it will cause
        correlation_id: Some(envelope.body.id().to_string()),
        message_type: envelope.body.kind().to_string(),
        delay: envelope.delay,
        time_to_live: envelope.time_to_live,
    })
}
