//! In-memory [`NativeSystem`] used by the unit tests.

use crate::access::HandleAccess;
use crate::native::{
    select_by_name, NativeError, NativeHandle, NativeResult, NativeSystem, ProcessId,
    ProcessSelector, Protection,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

pub use libc::{EBADF, EFAULT};

/// A native call observed by the stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open { pid: ProcessId, access: HandleAccess },
    Close { handle: NativeHandle },
    Read { address: u64, length: usize },
    Write { address: u64, length: usize },
    Protect { address: u64, length: usize, flags: Protection },
}

#[derive(Default)]
struct StubState {
    processes: Vec<(ProcessId, String)>,
    windows: Vec<(String, String, ProcessId)>,
    base: u64,
    memory: Vec<u8>,
    protection: HashMap<u64, Protection>,
    open: HashSet<u64>,
    next_handle: u64,
    calls: Vec<Call>,
    null_handles: bool,
    fail_reads: Option<i32>,
    fail_protect: Option<i32>,
    fail_protect_call: Option<(usize, i32)>,
    protect_calls: usize,
}

/// Fake process table plus one flat mapping of target memory.
pub struct StubSystem {
    state: Mutex<StubState>,
}

impl StubSystem {
    pub const INITIAL_PROTECTION: Protection = Protection::EXECUTE_READ;

    pub fn with_memory(base: u64, size: usize) -> Self {
        StubSystem {
            state: Mutex::new(StubState {
                base,
                memory: vec![0; size],
                next_handle: 1,
                ..Default::default()
            }),
        }
    }

    pub fn add_process(&self, pid: ProcessId, name: &str) -> &Self {
        self.state.lock().processes.push((pid, name.to_string()));
        self
    }

    pub fn add_window(&self, class: &str, title: &str, pid: ProcessId) -> &Self {
        self.state
            .lock()
            .windows
            .push((class.to_string(), title.to_string(), pid));
        self
    }

    pub fn remove_windows(&self) {
        self.state.lock().windows.clear();
    }

    /// Hand out NULL from now on, as if the process had exited.
    pub fn set_null_handles(&self, null: bool) {
        self.state.lock().null_handles = null;
    }

    pub fn fail_reads(&self, code: Option<i32>) {
        self.state.lock().fail_reads = code;
    }

    pub fn fail_protect(&self, code: Option<i32>) {
        self.state.lock().fail_protect = code;
    }

    /// Fail only the `nth` protection change (1-based) from now on.
    pub fn fail_protect_call(&self, nth: usize, code: i32) {
        let mut state = self.state.lock();
        state.protect_calls = 0;
        state.fail_protect_call = Some((nth, code));
    }

    /// Open a handle without recording a call.
    pub fn handle(&self) -> NativeHandle {
        let mut state = self.state.lock();
        let id = state.next_handle;
        state.next_handle += 1;
        state.open.insert(id);
        NativeHandle(id)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().open.len()
    }

    pub fn protection_at(&self, address: u64) -> Protection {
        self.state
            .lock()
            .protection
            .get(&address)
            .copied()
            .unwrap_or(Self::INITIAL_PROTECTION)
    }

    pub fn peek(&self, address: u64, length: usize) -> Vec<u8> {
        let state = self.state.lock();
        let start = (address - state.base) as usize;
        state.memory[start..start + length].to_vec()
    }
}

impl StubState {
    fn check_handle(&self, handle: NativeHandle) -> NativeResult<()> {
        if self.open.contains(&handle.0) {
            Ok(())
        } else {
            Err(NativeError::new(EBADF))
        }
    }

    /// Byte range of `[address, address + length)` that lies inside the mapping.
    fn window(&self, address: u64, length: usize) -> NativeResult<std::ops::Range<usize>> {
        let size = self.memory.len() as u64;
        let offset = address.checked_sub(self.base).ok_or(NativeError::new(EFAULT))?;
        if offset > size || (offset == size && length > 0) {
            return Err(NativeError::new(EFAULT));
        }
        let start = offset as usize;
        let end = start + length.min(self.memory.len() - start);
        Ok(start..end)
    }
}

impl NativeSystem for StubSystem {
    fn resolve_process_id(&self, selector: &ProcessSelector) -> Option<ProcessId> {
        let state = self.state.lock();
        match selector {
            ProcessSelector::Name { name, index } => select_by_name(
                state.processes.iter().map(|(pid, n)| (*pid, [n.as_str()])),
                name,
                *index,
            ),
            ProcessSelector::Window { class, title } => state
                .windows
                .iter()
                .find(|(c, t, _)| c == class && t == title)
                .map(|(_, _, pid)| *pid),
            ProcessSelector::Pid(pid) => state
                .processes
                .iter()
                .any(|(p, _)| p == pid)
                .then_some(*pid),
        }
    }

    fn open_process_handle(&self, pid: ProcessId, access: HandleAccess) -> NativeResult<NativeHandle> {
        let mut state = self.state.lock();
        state.calls.push(Call::Open { pid, access });
        if state.null_handles {
            return Ok(NativeHandle::NULL);
        }
        let id = state.next_handle;
        state.next_handle += 1;
        state.open.insert(id);
        Ok(NativeHandle(id))
    }

    fn close_handle(&self, handle: NativeHandle) -> NativeResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Close { handle });
        if state.open.remove(&handle.0) {
            Ok(())
        } else {
            Err(NativeError::new(EBADF))
        }
    }

    fn raw_read(&self, handle: NativeHandle, address: u64, length: usize) -> NativeResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.calls.push(Call::Read { address, length });
        state.check_handle(handle)?;
        if let Some(code) = state.fail_reads {
            return Err(NativeError::new(code));
        }
        let window = state.window(address, length)?;
        Ok(state.memory[window].to_vec())
    }

    fn raw_write(&self, handle: NativeHandle, address: u64, data: &[u8]) -> NativeResult<usize> {
        let mut state = self.state.lock();
        state.calls.push(Call::Write {
            address,
            length: data.len(),
        });
        state.check_handle(handle)?;
        let window = state.window(address, data.len())?;
        let written = window.len();
        state.memory[window].copy_from_slice(&data[..written]);
        Ok(written)
    }

    fn set_protection(
        &self,
        handle: NativeHandle,
        address: u64,
        length: usize,
        flags: Protection,
    ) -> NativeResult<Protection> {
        let mut state = self.state.lock();
        state.calls.push(Call::Protect {
            address,
            length,
            flags,
        });
        state.check_handle(handle)?;
        state.protect_calls += 1;
        if let Some(code) = state.fail_protect {
            return Err(NativeError::new(code));
        }
        if let Some((nth, code)) = state.fail_protect_call {
            if nth == state.protect_calls {
                return Err(NativeError::new(code));
            }
        }
        let previous = state
            .protection
            .insert(address, flags)
            .unwrap_or(Self::INITIAL_PROTECTION);
        Ok(previous)
    }
}
