//! Codes of the native call convention.
//!
//! Every bridged entry point returns a [`ReturnCode`] immediately and later
//! reports through the callback with a [`CallbackStatus`].

/// Immediate return code of a native entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReturnCode(pub i32);

impl ReturnCode {
    /// The call was accepted and will complete through the callback.
    pub const OK: Self = Self(0);
    /// The call was not accepted.
    pub const ERR: Self = Self(1);
    /// The call was not accepted because no callback was supplied.
    pub const MISSING_CALLBACK: Self = Self(2);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

impl From<i32> for ReturnCode {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

/// Status carried by one callback delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackStatus {
    /// Terminal success; the payload is the result.
    Ok,
    /// Terminal failure; the payload is the error message.
    Error,
    /// Intermediate delivery; the payload (if any) is a data chunk and the
    /// length is the byte count.
    Progress,
    /// Any code the convention does not define.
    Unknown(i32),
}

impl CallbackStatus {
    pub const RAW_OK: i32 = 0;
    pub const RAW_ERR: i32 = 1;
    pub const RAW_PROGRESS: i32 = 3;

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            Self::RAW_OK => Self::Ok,
            Self::RAW_ERR => Self::Error,
            Self::RAW_PROGRESS => Self::Progress,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Self::Ok => Self::RAW_OK,
            Self::Error => Self::RAW_ERR,
            Self::Progress => Self::RAW_PROGRESS,
            Self::Unknown(raw) => raw,
        }
    }

    /// Returns `true` for the statuses that resolve a ticket.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Error)
    }
}
