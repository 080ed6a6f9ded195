//! Node error types.

use std::fmt;

use storagelink_bridge::{BridgeError, CancelReason};

/// Which session kind an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Upload,
    Download,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Download => f.write_str("download"),
        }
    }
}

/// Errors produced by node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The native entry point did not accept the call.
    #[error("failed the call to {operation}, returned code {code}")]
    Rejected { operation: String, code: i32 },

    /// The native side reported a failure; the message is verbatim.
    #[error("{0}")]
    Native(String),

    #[error("{0}")]
    Cancelled(CancelReason),

    #[error("{reason}, but failed to cancel {session} session: {cancel_error}")]
    CancelFailed {
        session: SessionKind,
        reason: CancelReason,
        cancel_error: Box<NodeError>,
    },

    #[error("{session} failed: {error}, and failed to cancel {session} session: {cancel_error}")]
    CleanupFailed {
        session: SessionKind,
        error: Box<NodeError>,
        cancel_error: Box<NodeError>,
    },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] std::ffi::NulError),

    #[error("config error: {0}")]
    Config(String),

    #[error("a download session for {0} is already active")]
    DownloadActive(String),

    #[error("{session} session {id} is {state}")]
    InvalidState {
        session: SessionKind,
        id: String,
        state: crate::session::SessionState,
    },

    #[error("completion channel closed before the call resolved")]
    Disconnected,

    #[error("node has been destroyed")]
    Destroyed,
}

impl NodeError {
    /// Returns `true` when the caller's signal ended the operation, whether
    /// or not the native cleanup succeeded.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled(reason) | Self::CancelFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl From<BridgeError> for NodeError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Rejected { operation, code } => Self::Rejected { operation, code },
            BridgeError::Native(message) => Self::Native(message),
            BridgeError::Cancelled(reason) => Self::Cancelled(reason),
            BridgeError::Disconnected(_) => Self::Disconnected,
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
