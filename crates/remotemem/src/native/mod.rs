//! Native collaborator interface.
//!
//! The [`NativeSystem`] trait is the only place where the crate touches the
//! operating system: process resolution, handle management, raw byte
//! transfers and page protection. Sessions and the transfer engine are
//! written purely against this trait, so any backend (procfs, a debugger
//! bridge, an in-memory stub) can sit underneath.

#[cfg(target_os = "linux")]
pub mod procfs;

#[cfg(target_os = "linux")]
pub use procfs::ProcfsSystem;

use crate::access::HandleAccess;
use std::fmt;
use thiserror::Error;

/// OS process identifier.
pub type ProcessId = u32;

/// Code used when an I/O error carries no platform error number.
pub const UNKNOWN_ERROR_CODE: i32 = -1;

/// A failed native call, carrying the platform error code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("os error {code}")]
pub struct NativeError {
    pub code: i32,
}

impl NativeError {
    pub fn new(code: i32) -> Self {
        NativeError { code }
    }
}

impl From<std::io::Error> for NativeError {
    fn from(err: std::io::Error) -> Self {
        NativeError {
            code: err.raw_os_error().unwrap_or(UNKNOWN_ERROR_CODE),
        }
    }
}

/// Result type for native calls.
pub type NativeResult<T> = Result<T, NativeError>;

/// Opaque handle issued by a [`NativeSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    /// The handle a backend returns when the target no longer exists.
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

/// Page protection flags.
///
/// Values follow the Windows `PAGE_*` constants, which is the only platform
/// where remote protection changes are routinely available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Protection(pub u32);

impl Protection {
    pub const NOACCESS: Self = Self(0x01);
    pub const READONLY: Self = Self(0x02);
    pub const READWRITE: Self = Self(0x04);
    pub const WRITECOPY: Self = Self(0x08);
    pub const EXECUTE: Self = Self(0x10);
    pub const EXECUTE_READ: Self = Self(0x20);
    pub const EXECUTE_READWRITE: Self = Self(0x40);
    pub const EXECUTE_WRITECOPY: Self = Self(0x80);

    /// Modifier bits, combined with one of the access values above.
    pub const GUARD: u32 = 0x100;
    pub const NOCACHE: u32 = 0x200;
    pub const WRITECOMBINE: u32 = 0x400;

    const ACCESS_MASK: u32 = 0xFF;

    /// The access value with modifier bits cleared.
    pub fn access(self) -> Self {
        Self(self.0 & Self::ACCESS_MASK)
    }

    pub fn is_readable(self) -> bool {
        matches!(
            self.access(),
            Self::READONLY
                | Self::READWRITE
                | Self::WRITECOPY
                | Self::EXECUTE_READ
                | Self::EXECUTE_READWRITE
                | Self::EXECUTE_WRITECOPY
        )
    }

    pub fn is_writable(self) -> bool {
        matches!(
            self.access(),
            Self::READWRITE | Self::WRITECOPY | Self::EXECUTE_READWRITE | Self::EXECUTE_WRITECOPY
        )
    }

    pub fn is_executable(self) -> bool {
        matches!(
            self.access(),
            Self::EXECUTE | Self::EXECUTE_READ | Self::EXECUTE_READWRITE | Self::EXECUTE_WRITECOPY
        )
    }
}

impl From<u32> for Protection {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

impl From<Protection> for u32 {
    fn from(val: Protection) -> Self {
        val.0
    }
}

/// A byte range in the target's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    pub address: u64,
    pub length: usize,
}

impl MemoryRegion {
    pub fn new(address: u64, length: usize) -> Self {
        MemoryRegion { address, length }
    }

    /// One past the last address, saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.length as u64)
    }
}

/// How a session finds its target process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProcessSelector {
    /// The `index`-th process (in ascending pid order) with this name.
    Name { name: String, index: usize },
    /// The process owning the top-level window with this class and title.
    Window { class: String, title: String },
    /// A known process id.
    Pid(ProcessId),
}

impl ProcessSelector {
    /// Select by process name. A trailing `.exe` is stripped.
    pub fn by_name(name: &str, index: usize) -> Self {
        ProcessSelector::Name {
            name: strip_executable_suffix(name).to_string(),
            index,
        }
    }

    pub fn by_window(class: impl Into<String>, title: impl Into<String>) -> Self {
        ProcessSelector::Window {
            class: class.into(),
            title: title.into(),
        }
    }
}

impl fmt::Display for ProcessSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessSelector::Name { name, index } => write!(f, "process \"{}\" #{}", name, index),
            ProcessSelector::Window { class, title } => {
                write!(f, "window class=\"{}\" title=\"{}\"", class, title)
            }
            ProcessSelector::Pid(pid) => write!(f, "pid {}", pid),
        }
    }
}

/// Operating-system primitives the session layer is built on.
///
/// Implementations must be safe to share between threads; sessions
/// serialise their own use of a handle, but several sessions may share one
/// system.
pub trait NativeSystem: Send + Sync {
    /// Resolve a selector to a process id, or `None` if nothing matches.
    fn resolve_process_id(&self, selector: &ProcessSelector) -> Option<ProcessId>;

    /// Open a handle with the given rights. [`NativeHandle::NULL`] means the
    /// process is gone.
    fn open_process_handle(&self, pid: ProcessId, access: HandleAccess) -> NativeResult<NativeHandle>;

    fn close_handle(&self, handle: NativeHandle) -> NativeResult<()>;

    /// Read up to `length` bytes. May return fewer bytes than requested.
    fn raw_read(&self, handle: NativeHandle, address: u64, length: usize) -> NativeResult<Vec<u8>>;

    /// Write `data`, returning the number of bytes actually written.
    fn raw_write(&self, handle: NativeHandle, address: u64, data: &[u8]) -> NativeResult<usize>;

    /// Change protection of a range, returning the previous flags.
    fn set_protection(
        &self,
        handle: NativeHandle,
        address: u64,
        length: usize,
        flags: Protection,
    ) -> NativeResult<Protection>;
}

/// Strip a trailing `.exe` (any ASCII case) from a process name.
pub fn strip_executable_suffix(name: &str) -> &str {
    const SUFFIX: &str = ".exe";
    if name.len() > SUFFIX.len() {
        let split = name.len() - SUFFIX.len();
        if name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(SUFFIX) {
            return &name[..split];
        }
    }
    name
}

/// Pick the `index`-th process whose name matches `name`.
///
/// Candidates are `(pid, names)` pairs, where a process may be known under
/// several names (e.g. a short and a full image name). Matching is
/// case-sensitive after stripping `.exe` from both sides, and candidates are
/// ordered by ascending pid.
pub fn select_by_name<I, N>(candidates: I, name: &str, index: usize) -> Option<ProcessId>
where
    I: IntoIterator<Item = (ProcessId, N)>,
    N: IntoIterator,
    N::Item: AsRef<str>,
{
    let wanted = strip_executable_suffix(name);
    let mut matches: Vec<ProcessId> = candidates
        .into_iter()
        .filter_map(|(pid, names)| {
            names
                .into_iter()
                .any(|n| strip_executable_suffix(n.as_ref()) == wanted)
                .then_some(pid)
        })
        .collect();
    matches.sort_unstable();
    matches.dedup();
    matches.get(index).copied()
}
