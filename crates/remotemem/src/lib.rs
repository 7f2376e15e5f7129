//! remotemem: typed reads and writes into the memory of another process.
//!
//! A [`Session`] attaches to one target process, found by name, by window or
//! by pid, and moves plain values, arrays, structs and strings between that
//! process's address space and the caller using the native byte layout.
//! The operating system side is behind the [`NativeSystem`] trait; on Linux
//! [`ProcfsSystem`] implements it on top of `/proc/<pid>/mem`.
//!
//! ```no_run
//! use remotemem::{AccessMode, ProcfsSystem, Session};
//! use std::sync::Arc;
//!
//! let system = Arc::new(ProcfsSystem::new());
//! let session = Session::open_by_process(system, "game", 0, AccessMode::All)?;
//! let health: u32 = session.read(0x7ff6_1234_0010)?;
//! session.write(0x7ff6_1234_0010, &(health + 10))?;
//! # Ok::<(), remotemem::Error>(())
//! ```

pub mod access;
pub mod config;
pub mod error;
pub mod marshal;
pub mod native;
pub mod session;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use access::{AccessMode, Direction, HandleAccess};
pub use config::SessionOptions;
pub use error::{Error, Result};
pub use marshal::{NativeValue, TextEncoding};
#[cfg(target_os = "linux")]
pub use native::ProcfsSystem;
pub use native::{
    MemoryRegion, NativeError, NativeHandle, NativeSystem, ProcessId, ProcessSelector, Protection,
};
pub use session::Session;
pub use transfer::TransferEngine;
