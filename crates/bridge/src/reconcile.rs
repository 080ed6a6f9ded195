//! Racing a long-running call against a cancellation signal.
//!
//! When the signal fires first, the native operation is asked to stop and
//! the call is then awaited until it either finishes or the stop request
//! itself completes. The outcome reports which of the two happened, so the
//! caller can tell a clean cancellation from a late success.

use std::future::Future;

use tracing::debug;

use crate::cancel::{CancelReason, CancelSignal};

/// Outcome of [`race_with_cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Race<T, E> {
    /// The call finished before the signal fired.
    Completed(Result<T, E>),
    /// The signal fired and a stop was requested, but the call finished
    /// before the stop request did.
    CompletedAfterSignal {
        reason: CancelReason,
        result: Result<T, E>,
    },
    /// The signal fired and the stop request completed first.
    Cancelled {
        reason: CancelReason,
        cancel_result: Result<(), E>,
    },
}

/// Drives `main` until it completes or `signal` fires.
///
/// On firing, `cancel` is started and raced against the still-pending
/// `main`. `cancel` is never started when `main` wins outright.
pub async fn race_with_cancel<T, E, M, C, CF>(
    main: M,
    signal: &CancelSignal,
    cancel: C,
) -> Race<T, E>
where
    M: Future<Output = Result<T, E>>,
    C: FnOnce() -> CF,
    CF: Future<Output = Result<(), E>>,
{
    tokio::pin!(main);

    let reason = tokio::select! {
        biased;
        result = &mut main => return Race::Completed(result),
        reason = signal.fired() => reason,
    };

    debug!(%reason, "signal fired, requesting native cancel");
    let stop = cancel();
    tokio::pin!(stop);

    tokio::select! {
        biased;
        result = &mut main => Race::CompletedAfterSignal { reason, result },
        cancel_result = &mut stop => Race::Cancelled { reason, cancel_result },
    }
}
