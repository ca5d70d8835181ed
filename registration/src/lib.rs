//! # Conference Registration
//!
//! The registration bounded context: event-sourced aggregates for seat
//! inventory and seat assignments, the process manager coordinating the
//! order-reservation-payment-confirmation transaction, and the handlers and
//! routing glue that connect them to the runtime.
//!
//! ## Flow
//!
//! ```text
//! OrderPlaced ──► RegistrationProcessManager ──► MakeSeatReservation
//!                       ▲        │                      │
//!        SeatsReserved ─┘        │             SeatsAvailabilityHandler
//!        (correlated)            │                      │
//!                                ▼                      ▼
//!                    MarkSeatsAsReserved /      SeatsAvailability
//!                    ConfirmOrder /             (event stream)
//!                    CommitSeatReservation
//! ```
//!
//! Confirmed orders additionally get a [`seat_assignments::SeatAssignments`]
//! aggregate, one slot per purchased seat.

pub mod commands;
pub mod dispatch;
pub mod events;
pub mod handlers;
pub mod process_manager;
pub mod router;
pub mod seat_assignments;
pub mod seats_availability;
pub mod types;

pub use commands::RegistrationCommand;
pub use dispatch::{DispatchError, RegistrationDispatcher};
pub use events::{SeatAssignmentsEvent, SeatsAvailabilityEvent, SeatsReserved};
pub use handlers::{HandlerError, SeatAssignmentsHandler, SeatsAvailabilityHandler};
pub use process_manager::{ProcessError, ProcessState, RegistrationProcessManager};
pub use router::{RegistrationProcessRouter, RouterError};
pub use seat_assignments::{SeatAssignments, SeatAssignmentsError};
pub use seats_availability::{SeatsAvailability, SeatsAvailabilityError};
pub use types::{ConferenceId, OrderId, PersonalInfo, ReservationId, SeatQuantity, SeatType};
