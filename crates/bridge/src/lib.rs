//! Asynchronous-completion bridge for callback-driven native libraries.
//!
//! A native entry point returns an immediate [`ReturnCode`] and later reports
//! through a callback, possibly on a thread the library owns. Each call gets a
//! [`Ticket`] whose id travels through the library as opaque user data; the
//! [`CompletionRouter`] maps the id back to the waiting caller.
//!
//! - [`Bridge::call`] runs one request/response call, optionally bounded by a
//!   [`CancelSignal`].
//! - [`Bridge::start`] hands back the ticket so the caller can consume
//!   progress deliveries itself.
//! - [`race_with_cancel`] races a long call against a signal and asks the
//!   native side to stop when the signal wins.

pub mod bridge;
pub mod cancel;
pub mod error;
pub mod reconcile;
pub mod router;
pub mod status;
pub mod ticket;

pub use bridge::Bridge;
pub use cancel::{CancelReason, CancelSignal};
pub use error::BridgeError;
pub use reconcile::{Race, race_with_cancel};
pub use router::CompletionRouter;
pub use status::{CallbackStatus, ReturnCode};
pub use ticket::{Delivery, Progress, Ticket, TicketId};
