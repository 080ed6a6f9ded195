//! State and progress shared by upload and download sessions.

use std::fmt;

/// Lifecycle of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Finalized,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Finalized => "finalized",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Progress of a transfer after one delivery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    /// Bytes in this delivery.
    pub read: usize,
    /// Cumulative bytes so far.
    pub total: u64,
    /// Completion percentage when the total size is known.
    pub percent: Option<f64>,
}

impl TransferProgress {
    pub fn new(read: usize, total: u64, expected: Option<u64>) -> Self {
        Self {
            read,
            total,
            percent: percent(total, expected),
        }
    }
}

/// `done / expected` as a percentage, capped at 100. The last block may be
/// padded past the real size.
pub fn percent(done: u64, expected: Option<u64>) -> Option<f64> {
    match expected {
        Some(expected) if expected > 0 => Some((done as f64 / expected as f64 * 100.0).min(100.0)),
        _ => None,
    }
}
