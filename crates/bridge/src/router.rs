//! Completion router: maps ticket identifiers back to pending calls.
//!
//! The issuer inserts and releases; the native callback thread only looks
//! up and resolves. The map lock is never held while a delivery is sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::status::CallbackStatus;
use crate::ticket::{Delivery, Progress, Ticket, TicketId};

static GLOBAL: OnceLock<Arc<CompletionRouter>> = OnceLock::new();

/// Registry of outstanding tickets.
pub struct CompletionRouter {
    next_id: AtomicU64,
    slots: Mutex<HashMap<u64, Arc<Slot>>>,
}

/// Router side of a ticket. The sender is taken by the terminal delivery,
/// so a second terminal delivery finds nothing to resolve.
struct Slot {
    relay_progress: bool,
    tx: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
}

impl Default for CompletionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionRouter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide router used by the native callback entry point.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Registers a ticket that ignores progress deliveries.
    pub fn issue(self: &Arc<Self>) -> Ticket {
        self.register(false)
    }

    /// Registers a ticket that relays progress deliveries to the caller.
    pub fn issue_with_progress(self: &Arc<Self>) -> Ticket {
        self.register(true)
    }

    fn register(self: &Arc<Self>, relay_progress: bool) -> Ticket {
        let id = loop {
            if let Some(id) = TicketId::new(self.next_id.fetch_add(1, Ordering::Relaxed)) {
                break id;
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.slots).insert(
            id.get(),
            Arc::new(Slot {
                relay_progress,
                tx: Mutex::new(Some(tx)),
            }),
        );
        trace!(ticket = %id, relay_progress, "ticket issued");
        Ticket::new(id, Arc::clone(self), rx)
    }

    /// Routes one callback delivery.
    ///
    /// `len` is the length reported by the native side; `payload` is the data
    /// it pointed at, if any. Payload bytes are copied before returning.
    /// Unknown or zero identifiers and deliveries to resolved tickets are
    /// dropped.
    pub fn deliver(&self, raw_id: u64, status: CallbackStatus, len: usize, payload: Option<&[u8]>) {
        if raw_id == 0 {
            return;
        }
        let Some(slot) = lock(&self.slots).get(&raw_id).cloned() else {
            trace!(ticket = raw_id, ?status, "delivery for unknown ticket dropped");
            return;
        };

        match status {
            CallbackStatus::Progress => {
                if !slot.relay_progress {
                    return;
                }
                let tx = lock(&slot.tx);
                let Some(tx) = tx.as_ref() else {
                    trace!(ticket = raw_id, "progress after resolution dropped");
                    return;
                };
                let _ = tx.send(Delivery::Progress(Progress {
                    len,
                    chunk: payload.map(<[u8]>::to_vec),
                }));
            }
            CallbackStatus::Ok | CallbackStatus::Error => {
                let Some(tx) = lock(&slot.tx).take() else {
                    debug!(ticket = raw_id, ?status, "terminal delivery for resolved ticket dropped");
                    return;
                };
                let text = payload
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .unwrap_or_default();
                let result = if status == CallbackStatus::Ok {
                    Ok(text)
                } else {
                    Err(text)
                };
                let _ = tx.send(Delivery::Done(result));
            }
            CallbackStatus::Unknown(code) => {
                warn!(ticket = raw_id, code, "unrecognised callback status dropped");
            }
        }
    }

    pub(crate) fn release(&self, id: TicketId) {
        if lock(&self.slots).remove(&id.get()).is_some() {
            trace!(ticket = %id, "ticket released");
        }
    }

    /// Number of tickets currently registered.
    pub fn pending(&self) -> usize {
        lock(&self.slots).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
