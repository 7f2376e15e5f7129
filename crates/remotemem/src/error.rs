//! Error types for session and transfer operations.

use crate::access::{AccessMode, Direction};
use crate::native::NativeError;
use thiserror::Error;

/// Errors that can occur while opening a session or moving memory.
#[derive(Error, Debug)]
pub enum Error {
    /// The operation is not permitted under the session's access mode.
    #[error("Invalid access: cannot {direction} with access mode {mode}")]
    InvalidAccess {
        mode: AccessMode,
        direction: Direction,
    },

    /// No process or window matched the selector.
    #[error("No process found for {0}")]
    NotFound(String),

    /// A native call failed.
    #[error("{operation} failed{} (os error {code})", fmt_address(.address))]
    Os {
        operation: &'static str,
        address: Option<u64>,
        code: i32,
    },

    /// Caller supplied an argument that cannot be honoured.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The native call moved fewer bytes than requested.
    #[error("Short {direction} at {address:#x}: requested {requested} bytes, transferred {transferred}")]
    ShortTransfer {
        direction: Direction,
        address: u64,
        requested: usize,
        transferred: usize,
    },

    /// A typed buffer had the wrong length for its value type.
    #[error("Size mismatch for {type_name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        type_name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The bytes do not form a valid value of the requested type.
    #[error("Invalid value for {type_name}: {reason}")]
    InvalidValue {
        type_name: &'static str,
        reason: String,
    },

    /// The session currently holds no process handle (liveness check failed).
    #[error("Session has no live process handle")]
    NoHandle,

    /// The session has been closed.
    #[error("Session is closed")]
    Closed,

    /// Session options could not be parsed.
    #[error("Invalid session options: {0}")]
    Options(#[from] serde_json::Error),
}

fn fmt_address(address: &Option<u64>) -> String {
    match address {
        Some(addr) => format!(" at {:#x}", addr),
        None => String::new(),
    }
}

impl Error {
    /// Create an Os error from a failed native call.
    pub fn os(operation: &'static str, address: Option<u64>, native: NativeError) -> Self {
        Error::Os {
            operation,
            address,
            code: native.code,
        }
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a SizeMismatch error.
    pub fn size_mismatch(type_name: &'static str, expected: usize, actual: usize) -> Self {
        Error::SizeMismatch {
            type_name,
            expected,
            actual,
        }
    }

    /// Create an InvalidValue error.
    pub fn invalid_value(type_name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            type_name,
            reason: reason.into(),
        }
    }

    /// True for errors caused by how the API was called rather than by the
    /// target process or the OS.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::InvalidAccess { .. }
                | Error::InvalidArgument(_)
                | Error::SizeMismatch { .. }
                | Error::Closed
                | Error::Options(_)
        )
    }

    /// Platform error code, if this error came from a native call.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Error::Os { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for session and transfer operations.
pub type Result<T> = std::result::Result<T, Error>;
