//! Linux backend over `/proc/<pid>/mem`.
//!
//! Handles are entries in a table of open `mem` files. The file is opened
//! read-only, write-only or read-write depending on the requested rights,
//! so the kernel enforces the session's access mode as well.

use super::{
    select_by_name, NativeError, NativeHandle, NativeResult, NativeSystem, ProcessId,
    ProcessSelector, Protection,
};
use crate::access::HandleAccess;
use libc::{EBADF, EINVAL, ENOMEM, ENOSYS};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default mount point of procfs.
pub const DEFAULT_PROCFS_ROOT: &str = "/proc";

struct OpenProcess {
    pid: ProcessId,
    mem: Arc<File>,
}

/// [`NativeSystem`] backed by procfs.
pub struct ProcfsSystem {
    root: PathBuf,
    handles: Mutex<HashMap<u64, OpenProcess>>,
    next_handle: AtomicU64,
}

impl Default for ProcfsSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsSystem {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROCFS_ROOT)
    }

    /// Use a procfs tree mounted somewhere other than `/proc`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        ProcfsSystem {
            root: root.into(),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.lock().len()
    }

    fn process_dir(&self, pid: ProcessId) -> PathBuf {
        self.root.join(pid.to_string())
    }

    /// Every numeric entry under the root, with the names it is known by.
    fn list_processes(&self) -> Vec<(ProcessId, Vec<String>)> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let pid = entry.file_name().to_str()?.parse::<ProcessId>().ok()?;
                Some((pid, self.process_names(&entry.path())))
            })
            .collect()
    }

    /// `comm` is truncated to 15 bytes, so the `exe` link basename is also
    /// offered when it is readable.
    fn process_names(&self, dir: &Path) -> Vec<String> {
        let mut names = Vec::with_capacity(2);
        if let Ok(comm) = fs::read_to_string(dir.join("comm")) {
            names.push(comm.trim_end_matches('\n').to_string());
        }
        if let Ok(exe) = fs::read_link(dir.join("exe")) {
            if let Some(base) = exe.file_name().and_then(|n| n.to_str()) {
                names.push(base.to_string());
            }
        }
        names
    }

    fn mem_file(&self, handle: NativeHandle) -> NativeResult<Arc<File>> {
        self.handles
            .lock()
            .get(&handle.0)
            .map(|open| open.mem.clone())
            .ok_or(NativeError::new(EBADF))
    }
}

impl NativeSystem for ProcfsSystem {
    fn resolve_process_id(&self, selector: &ProcessSelector) -> Option<ProcessId> {
        match selector {
            ProcessSelector::Pid(pid) => self.process_dir(*pid).is_dir().then_some(*pid),
            ProcessSelector::Name { name, index } => {
                select_by_name(self.list_processes(), name, *index)
            }
            ProcessSelector::Window { .. } => {
                debug!("Window lookup is not available through procfs");
                None
            }
        }
    }

    fn open_process_handle(&self, pid: ProcessId, access: HandleAccess) -> NativeResult<NativeHandle> {
        if !access.read && !access.write {
            return Err(NativeError::new(EINVAL));
        }

        let path = self.process_dir(pid).join("mem");
        let mem = match OpenOptions::new()
            .read(access.read)
            .write(access.write)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(NativeHandle::NULL),
            Err(e) => return Err(e.into()),
        };

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(
            id,
            OpenProcess {
                pid,
                mem: Arc::new(mem),
            },
        );
        debug!("Opened {} as handle {}", path.display(), id);
        Ok(NativeHandle(id))
    }

    fn close_handle(&self, handle: NativeHandle) -> NativeResult<()> {
        match self.handles.lock().remove(&handle.0) {
            Some(open) => {
                debug!("Closed handle {} (pid {})", handle.0, open.pid);
                Ok(())
            }
            None => Err(NativeError::new(EBADF)),
        }
    }

    fn raw_read(&self, handle: NativeHandle, address: u64, length: usize) -> NativeResult<Vec<u8>> {
        let mem = self.mem_file(handle)?;
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(length)
            .map_err(|_| NativeError::new(ENOMEM))?;
        buffer.resize(length, 0);
        let mut filled = 0;

        while filled < length {
            match mem.read_at(&mut buffer[filled..], address.saturating_add(filled as u64)) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if filled == 0 => return Err(e.into()),
                Err(_) => break,
            }
        }

        buffer.truncate(filled);
        Ok(buffer)
    }

    fn raw_write(&self, handle: NativeHandle, address: u64, data: &[u8]) -> NativeResult<usize> {
        let mem = self.mem_file(handle)?;
        let mut written = 0;

        while written < data.len() {
            match mem.write_at(&data[written..], address.saturating_add(written as u64)) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if written == 0 => return Err(e.into()),
                Err(_) => break,
            }
        }

        Ok(written)
    }

    fn set_protection(
        &self,
        _handle: NativeHandle,
        _address: u64,
        _length: usize,
        _flags: Protection,
    ) -> NativeResult<Protection> {
        // Changing another process's mappings needs code running inside it.
        Err(NativeError::new(ENOSYS))
    }
}
