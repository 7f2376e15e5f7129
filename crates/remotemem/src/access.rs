//! Access-mode gate.
//!
//! A session declares up front whether it may read, write, or both. Every
//! transfer is checked here before any native call is attempted, and the
//! mode also decides which rights the OS handle is opened with.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared capability of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Reading and writing.
    #[default]
    All,
    /// Reading only.
    Read,
    /// Writing only.
    Write,
}

/// Direction of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Rights requested from the OS when opening a process handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleAccess {
    pub read: bool,
    pub write: bool,
}

impl AccessMode {
    pub fn can_read(self) -> bool {
        matches!(self, AccessMode::All | AccessMode::Read)
    }

    pub fn can_write(self) -> bool {
        matches!(self, AccessMode::All | AccessMode::Write)
    }

    /// Whether a transfer in `direction` is allowed.
    pub fn permits(self, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.can_read(),
            Direction::Write => self.can_write(),
        }
    }

    /// Fail with `InvalidAccess` unless `direction` is allowed.
    pub fn ensure(self, direction: Direction) -> Result<()> {
        if self.permits(direction) {
            Ok(())
        } else {
            Err(Error::InvalidAccess {
                mode: self,
                direction,
            })
        }
    }

    /// Handle rights matching this mode.
    pub fn handle_access(self) -> HandleAccess {
        HandleAccess {
            read: self.can_read(),
            write: self.can_write(),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessMode::All => "all",
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        })
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Read => "read",
            Direction::Write => "write",
        })
    }
}
