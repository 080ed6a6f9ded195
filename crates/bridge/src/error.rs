//! Bridge error types.

use crate::cancel::CancelReason;
use crate::ticket::TicketId;

/// Errors produced while waiting for a native call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The entry point did not accept the call; nothing was waited for.
    #[error("failed the call to {operation}, returned code {code}")]
    Rejected { operation: String, code: i32 },

    /// The terminal callback reported an error; the message is verbatim.
    #[error("{0}")]
    Native(String),

    #[error("{0}")]
    Cancelled(CancelReason),

    #[error("completion channel for ticket {0} closed before resolution")]
    Disconnected(TicketId),
}

impl BridgeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
