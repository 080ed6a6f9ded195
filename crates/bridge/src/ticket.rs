//! Call tickets: single-use correlation tokens for one outstanding call.

use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::error::BridgeError;
use crate::router::CompletionRouter;
use crate::status::ReturnCode;

/// Process-unique ticket identifier. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TicketId(NonZeroU64);

impl TicketId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Encodes the id as the opaque user-data pointer handed to the native side.
    pub fn as_user_data(self) -> *mut c_void {
        self.0.get() as usize as *mut c_void
    }

    pub fn from_user_data(ptr: *mut c_void) -> Option<Self> {
        Self::new(ptr as usize as u64)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An intermediate delivery: `len` bytes were processed, `chunk` carries the
/// data when the native side sent any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub len: usize,
    pub chunk: Option<Vec<u8>>,
}

/// One callback delivery as observed by the waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Progress(Progress),
    /// Terminal delivery: success payload or failure message.
    Done(Result<String, String>),
}

/// Caller side of one outstanding native call.
///
/// Deliveries arrive in emission order. Dropping the ticket releases it from
/// the router; anything the native side sends afterwards is discarded.
pub struct Ticket {
    id: TicketId,
    router: Arc<CompletionRouter>,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Ticket {
    pub(crate) fn new(
        id: TicketId,
        router: Arc<CompletionRouter>,
        rx: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self { id, router, rx }
    }

    pub fn id(&self) -> TicketId {
        self.id
    }

    /// Checks the entry point's immediate return code.
    ///
    /// A rejected call never produces a wait: the ticket is released and
    /// [`BridgeError::Rejected`] is returned.
    pub fn accept(self, operation: &str, code: ReturnCode) -> Result<Self, BridgeError> {
        if code.is_ok() {
            return Ok(self);
        }
        debug!(ticket = %self.id, operation, code = code.raw(), "native call rejected");
        Err(BridgeError::Rejected {
            operation: operation.to_string(),
            code: code.raw(),
        })
    }

    /// Receives the next delivery.
    pub async fn next(&mut self) -> Result<Delivery, BridgeError> {
        self.rx.recv().await.ok_or(BridgeError::Disconnected(self.id))
    }

    /// Returns a delivery that already arrived, without waiting.
    pub fn try_next(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    /// Waits for the terminal delivery, skipping progress.
    ///
    /// With a signal, the wait stops as soon as it fires. The native
    /// operation is not told to stop; that is the caller's job.
    pub async fn wait(mut self, cancel: Option<&CancelSignal>) -> Result<String, BridgeError> {
        let id = self.id;
        loop {
            let delivery = match cancel {
                Some(signal) => tokio::select! {
                    biased;
                    delivery = self.next() => delivery?,
                    reason = signal.fired() => {
                        debug!(ticket = %id, %reason, "wait cancelled");
                        return Err(BridgeError::Cancelled(reason));
                    }
                },
                None => self.next().await?,
            };
            if let Delivery::Done(result) = delivery {
                return result.map_err(BridgeError::Native);
            }
        }
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket").field("id", &self.id).finish()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.router.release(self.id);
    }
}
