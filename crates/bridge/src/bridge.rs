//! Request/response and progress-relaying calls over the completion router.

use std::sync::Arc;

use tracing::debug;

use crate::cancel::CancelSignal;
use crate::error::BridgeError;
use crate::router::CompletionRouter;
use crate::status::ReturnCode;
use crate::ticket::{Ticket, TicketId};

/// Issues tickets against one router and runs calls through them.
#[derive(Clone)]
pub struct Bridge {
    router: Arc<CompletionRouter>,
}

impl Bridge {
    pub fn new(router: Arc<CompletionRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<CompletionRouter> {
        &self.router
    }

    /// Issues a ticket, invokes the entry point and waits for the result.
    ///
    /// `invoke` receives the ticket id and returns the entry point's
    /// immediate code. The ticket is released on every exit path.
    pub async fn call<F>(
        &self,
        operation: &str,
        cancel: Option<&CancelSignal>,
        invoke: F,
    ) -> Result<String, BridgeError>
    where
        F: FnOnce(TicketId) -> ReturnCode,
    {
        let ticket = self.router.issue();
        let code = invoke(ticket.id());
        let ticket = ticket.accept(operation, code)?;
        debug!(ticket = %ticket.id(), operation, "awaiting native completion");
        ticket.wait(cancel).await
    }

    /// Issues a progress-relaying ticket and invokes the entry point.
    ///
    /// The caller drives the returned ticket with [`Ticket::next`].
    pub fn start<F>(&self, operation: &str, invoke: F) -> Result<Ticket, BridgeError>
    where
        F: FnOnce(TicketId) -> ReturnCode,
    {
        let ticket = self.router.issue_with_progress();
        let code = invoke(ticket.id());
        ticket.accept(operation, code)
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(CompletionRouter::global())
    }
}
