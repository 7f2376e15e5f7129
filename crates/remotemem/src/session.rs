//! Process memory sessions.
//!
//! A [`Session`] owns exactly one native handle to its target process. The
//! handle is opened with rights derived from the access mode, re-derived on
//! liveness checks and mode changes, and released once, either by
//! [`Session::close`] or when the session is dropped.
//!
//! All transfers go through the session's lock, so a protection
//! relax/transfer/restore sequence is never interleaved with another
//! caller's on the same session.

use crate::access::AccessMode;
use crate::config::SessionOptions;
use crate::error::{Error, Result};
use crate::marshal::{NativeValue, TextEncoding};
use crate::native::{MemoryRegion, NativeHandle, NativeSystem, ProcessId, ProcessSelector};
use crate::transfer::{TransferContext, TransferEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

struct SessionState {
    /// Current options; `options.access` follows `set_mode`.
    options: SessionOptions,
    pid: ProcessId,
    handle: Option<NativeHandle>,
    closed: bool,
}

/// An open view onto another process's memory.
pub struct Session<S: NativeSystem + ?Sized> {
    system: Arc<S>,
    selector: ProcessSelector,
    engine: TransferEngine,
    state: Mutex<SessionState>,
}

/// Open a handle, mapping a NULL handle to `None`.
fn open_handle<S: NativeSystem + ?Sized>(
    system: &S,
    pid: ProcessId,
    mode: AccessMode,
) -> Result<Option<NativeHandle>> {
    let handle = system
        .open_process_handle(pid, mode.handle_access())
        .map_err(|e| Error::os("open process", None, e))?;
    Ok((!handle.is_null()).then_some(handle))
}

impl<S: NativeSystem + ?Sized> Session<S> {
    /// Resolve `selector` and open a handle under `options.access`.
    ///
    /// Fails with [`Error::NotFound`] when nothing matches (including an
    /// out-of-range name index) and with [`Error::Os`] when the handle
    /// cannot be opened. No session exists unless both steps succeed.
    pub fn open(system: Arc<S>, selector: ProcessSelector, options: SessionOptions) -> Result<Self> {
        let pid = system
            .resolve_process_id(&selector)
            .ok_or_else(|| Error::NotFound(selector.to_string()))?;
        debug!("Resolved {} to pid {}", selector, pid);

        let handle = open_handle(&*system, pid, options.access)?
            .ok_or_else(|| Error::NotFound(format!("{} (pid {} is gone)", selector, pid)))?;
        debug!("Opened pid {} with access {} as handle {}", pid, options.access, handle.0);

        Ok(Session {
            system,
            selector,
            engine: TransferEngine::new(options.protection_bracket),
            state: Mutex::new(SessionState {
                options,
                pid,
                handle: Some(handle),
                closed: false,
            }),
        })
    }

    /// Open the `index`-th process called `name` (a trailing `.exe` is ignored).
    pub fn open_by_process(system: Arc<S>, name: &str, index: usize, mode: AccessMode) -> Result<Self> {
        Self::open(
            system,
            ProcessSelector::by_name(name, index),
            SessionOptions::default().with_access(mode),
        )
    }

    /// Open the process owning the window with this class and title.
    pub fn open_by_window(system: Arc<S>, class: &str, title: &str, mode: AccessMode) -> Result<Self> {
        Self::open(
            system,
            ProcessSelector::by_window(class, title),
            SessionOptions::default().with_access(mode),
        )
    }

    pub fn open_by_pid(system: Arc<S>, pid: ProcessId, mode: AccessMode) -> Result<Self> {
        Self::open(
            system,
            ProcessSelector::Pid(pid),
            SessionOptions::default().with_access(mode),
        )
    }

    pub fn selector(&self) -> &ProcessSelector {
        &self.selector
    }

    /// Options in effect, including the current access mode.
    pub fn options(&self) -> SessionOptions {
        self.state.lock().options
    }

    pub fn system(&self) -> &Arc<S> {
        &self.system
    }

    pub fn mode(&self) -> AccessMode {
        self.state.lock().options.access
    }

    /// Process id the session is currently attached to.
    pub fn pid(&self) -> ProcessId {
        self.state.lock().pid
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn release_handle(&self, state: &mut SessionState) -> Result<()> {
        match state.handle.take() {
            Some(handle) => self
                .system
                .close_handle(handle)
                .map_err(|e| Error::os("close handle", None, e)),
            None => Ok(()),
        }
    }

    /// Re-resolve the target and reopen the handle.
    ///
    /// Window selectors look the window up again; name and pid selectors
    /// keep the process found at open time. Returns false, leaving the
    /// session without a handle, when the target can no longer be opened.
    /// Call this before transferring if the target may have exited.
    pub fn is_running(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if let Err(e) = self.release_handle(&mut state) {
            warn!("Failed to release stale handle for pid {}: {}", state.pid, e);
        }

        let pid = match &self.selector {
            ProcessSelector::Window { .. } => match self.system.resolve_process_id(&self.selector) {
                Some(pid) => pid,
                None => {
                    debug!("{} no longer resolves", self.selector);
                    return false;
                }
            },
            _ => state.pid,
        };

        match open_handle(&*self.system, pid, state.options.access) {
            Ok(Some(handle)) => {
                state.pid = pid;
                state.handle = Some(handle);
                true
            }
            Ok(None) => {
                debug!("Pid {} is no longer running", pid);
                false
            }
            Err(e) => {
                debug!("Cannot reopen pid {}: {}", pid, e);
                false
            }
        }
    }

    /// Change the access mode and reopen the handle with matching rights.
    ///
    /// The previous handle, if any, is closed first. If the process can no
    /// longer be opened the new mode is still recorded and the session is
    /// left without a handle.
    pub fn set_mode(&self, mode: AccessMode) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        debug!("Changing access mode of pid {} from {} to {}", state.pid, state.options.access, mode);
        state.options.access = mode;

        let released = self.release_handle(&mut state);
        state.handle = open_handle(&*self.system, state.pid, mode)?;
        released?;

        if state.handle.is_none() {
            return Err(Error::NotFound(format!("{} (pid {} is gone)", self.selector, state.pid)));
        }
        Ok(())
    }

    /// Release the handle. Safe to call more than once; every transfer
    /// afterwards fails with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        debug!("Closing session for pid {}", state.pid);
        self.release_handle(&mut state)
    }

    /// Run one transfer while holding the session lock.
    fn transfer<T>(&self, op: impl FnOnce(&TransferEngine, &TransferContext<'_, S>) -> Result<T>) -> Result<T> {
        let state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        let ctx = TransferContext {
            system: &*self.system,
            mode: state.options.access,
            handle: state.handle,
        };
        op(&self.engine, &ctx)
    }

    /// Read exactly `length` raw bytes.
    pub fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>> {
        self.transfer(|engine, ctx| engine.read_bytes(ctx, MemoryRegion::new(address, length)))
    }

    pub fn read<T: NativeValue>(&self, address: u64) -> Result<T> {
        self.transfer(|engine, ctx| engine.read_value(ctx, address))
    }

    /// Read `count` consecutive values of `T`.
    pub fn read_array<T: NativeValue>(&self, address: u64, count: usize) -> Result<Vec<T>> {
        self.read_array_with_stride(address, count, T::SIZE)
    }

    /// Read `count` values spaced `stride` bytes apart, for element layouts
    /// whose size in the target differs from `T::SIZE`.
    pub fn read_array_with_stride<T: NativeValue>(
        &self,
        address: u64,
        count: usize,
        stride: usize,
    ) -> Result<Vec<T>> {
        self.transfer(|engine, ctx| engine.read_array(ctx, address, count, stride))
    }

    /// Read `byte_count` bytes as text in the session's default encoding.
    pub fn read_string(&self, address: u64, byte_count: usize) -> Result<String> {
        self.read_string_with(address, byte_count, self.options().encoding)
    }

    pub fn read_string_with(&self, address: u64, byte_count: usize, encoding: TextEncoding) -> Result<String> {
        self.transfer(|engine, ctx| engine.read_string(ctx, address, byte_count, encoding))
    }

    pub fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        self.transfer(|engine, ctx| engine.write_bytes(ctx, address, data))
    }

    pub fn write<T: NativeValue>(&self, address: u64, value: &T) -> Result<()> {
        self.transfer(|engine, ctx| engine.write_value(ctx, address, value))
    }

    /// Write `values` back to back. Fails with [`Error::InvalidArgument`] if empty.
    pub fn write_array<T: NativeValue>(&self, address: u64, values: &[T]) -> Result<()> {
        self.transfer(|engine, ctx| engine.write_array(ctx, address, values))
    }

    /// Write `text` in the session's default encoding. No terminator is appended.
    pub fn write_string(&self, address: u64, text: &str) -> Result<()> {
        self.write_string_with(address, text, self.options().encoding)
    }

    pub fn write_string_with(&self, address: u64, text: &str, encoding: TextEncoding) -> Result<()> {
        self.transfer(|engine, ctx| engine.write_string(ctx, address, text, encoding))
    }
}

impl<S: NativeSystem + ?Sized> Drop for Session<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close session for {}: {}", self.selector, e);
        }
    }
}
