//! Typed transfer engine.
//!
//! Every transfer follows the same path: check the access mode, require a
//! live handle, optionally relax page protection, make exactly one native
//! call, restore protection, then verify that the full byte count moved.
//! Typed reads and writes are thin layers over that path using
//! [`NativeValue`] for the byte conversion.

use crate::access::{AccessMode, Direction};
use crate::error::{Error, Result};
use crate::marshal::{array_byte_len, decode_array, encode_array, NativeValue, TextEncoding};
use crate::native::{MemoryRegion, NativeHandle, NativeSystem, Protection};
use tracing::{trace, warn};

/// Everything a single transfer needs from its session.
pub struct TransferContext<'a, S: NativeSystem + ?Sized> {
    pub system: &'a S,
    pub mode: AccessMode,
    pub handle: Option<NativeHandle>,
}

impl<S: NativeSystem + ?Sized> TransferContext<'_, S> {
    fn live_handle(&self) -> Result<NativeHandle> {
        self.handle.ok_or(Error::NoHandle)
    }
}

/// Stateless transfer engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferEngine {
    protection_bracket: bool,
}

/// Restores the captured protection flags when dropped, unless
/// [`ProtectionGuard::restore`] already did.
struct ProtectionGuard<'a, S: NativeSystem + ?Sized> {
    system: &'a S,
    handle: NativeHandle,
    region: MemoryRegion,
    previous: Protection,
    armed: bool,
}

impl<'a, S: NativeSystem + ?Sized> ProtectionGuard<'a, S> {
    fn relax(system: &'a S, handle: NativeHandle, region: MemoryRegion, flags: Protection) -> Result<Self> {
        let previous = system
            .set_protection(handle, region.address, region.length, flags)
            .map_err(|e| Error::os("relax protection", Some(region.address), e))?;
        trace!(
            "Relaxed {:#x}..{:#x} from {:#x} to {:#x}",
            region.address,
            region.end(),
            previous.0,
            flags.0
        );
        Ok(ProtectionGuard {
            system,
            handle,
            region,
            previous,
            armed: true,
        })
    }

    fn restore(mut self) -> Result<()> {
        self.armed = false;
        self.system
            .set_protection(self.handle, self.region.address, self.region.length, self.previous)
            .map(|_| ())
            .map_err(|e| Error::os("restore protection", Some(self.region.address), e))
    }
}

impl<S: NativeSystem + ?Sized> Drop for ProtectionGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.system.set_protection(
                self.handle,
                self.region.address,
                self.region.length,
                self.previous,
            ) {
                warn!("Failed to restore protection at {:#x}: {}", self.region.address, e);
            }
        }
    }
}

impl TransferEngine {
    pub fn new(protection_bracket: bool) -> Self {
        TransferEngine { protection_bracket }
    }

    pub fn protection_bracket(&self) -> bool {
        self.protection_bracket
    }

    /// Run `transfer` inside a relax/restore pair when bracketing is enabled.
    ///
    /// The restore runs whatever the transfer returned. A transfer error
    /// takes precedence over a restore error.
    fn bracketed<S, T>(
        &self,
        system: &S,
        handle: NativeHandle,
        region: MemoryRegion,
        flags: Protection,
        transfer: impl FnOnce() -> Result<T>,
    ) -> Result<T>
    where
        S: NativeSystem + ?Sized,
    {
        if !self.protection_bracket {
            return transfer();
        }

        let guard = ProtectionGuard::relax(system, handle, region, flags)?;
        let outcome = transfer();
        let restored = guard.restore();

        match (outcome, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(restore_err)) => Err(restore_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restore_err)) => {
                warn!("Transfer failed and protection was not restored: {}", restore_err);
                Err(err)
            }
        }
    }

    /// Read exactly `region.length` bytes.
    pub fn read_bytes<S: NativeSystem + ?Sized>(
        &self,
        ctx: &TransferContext<'_, S>,
        region: MemoryRegion,
    ) -> Result<Vec<u8>> {
        ctx.mode.ensure(Direction::Read)?;
        let handle = ctx.live_handle()?;
        trace!("Reading {} bytes at {:#x}", region.length, region.address);

        let bytes = self.bracketed(ctx.system, handle, region, Protection::READONLY, || {
            ctx.system
                .raw_read(handle, region.address, region.length)
                .map_err(|e| Error::os("raw read", Some(region.address), e))
        })?;

        if bytes.len() != region.length {
            return Err(Error::ShortTransfer {
                direction: Direction::Read,
                address: region.address,
                requested: region.length,
                transferred: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Write all of `data` at `address`.
    pub fn write_bytes<S: NativeSystem + ?Sized>(
        &self,
        ctx: &TransferContext<'_, S>,
        address: u64,
        data: &[u8],
    ) -> Result<()> {
        ctx.mode.ensure(Direction::Write)?;
        if data.is_empty() {
            return Err(Error::invalid_argument("refusing to write an empty buffer"));
        }
        let handle = ctx.live_handle()?;
        let region = MemoryRegion::new(address, data.len());
        trace!("Writing {} bytes at {:#x}", region.length, region.address);

        let written = self.bracketed(ctx.system, handle, region, Protection::READWRITE, || {
            ctx.system
                .raw_write(handle, address, data)
                .map_err(|e| Error::os("raw write", Some(address), e))
        })?;

        if written != data.len() {
            return Err(Error::ShortTransfer {
                direction: Direction::Write,
                address,
                requested: data.len(),
                transferred: written,
            });
        }
        Ok(())
    }

    /// Read one value of `T::SIZE` bytes.
    pub fn read_value<T: NativeValue, S: NativeSystem + ?Sized>(
        &self,
        ctx: &TransferContext<'_, S>,
        address: u64,
    ) -> Result<T> {
        let bytes = self.read_bytes(ctx, MemoryRegion::new(address, T::SIZE))?;
        T::decode(&bytes)
    }

    /// Read `count` elements spaced `stride` bytes apart with a single native read.
    pub fn read_array<T: NativeValue, S: NativeSystem + ?Sized>(
        &self,
        ctx: &TransferContext<'_, S>,
        address: u64,
        count: usize,
        stride: usize,
    ) -> Result<Vec<T>> {
        ctx.mode.ensure(Direction::Read)?;
        if stride == 0 {
            return Err(Error::invalid_argument("array stride must be non-zero"));
        }
        let length = array_byte_len(count, stride)?;
        let bytes = self.read_bytes(ctx, MemoryRegion::new(address, length))?;
        decode_array(&bytes, count, stride)
    }

    /// Read `byte_count` bytes and decode them as text.
    pub fn read_string<S: NativeSystem + ?Sized>(
        &self,
        ctx: &TransferContext<'_, S>,
        address: u64,
        byte_count: usize,
        encoding: TextEncoding,
    ) -> Result<String> {
        let bytes: Vec<u8> = self.read_array(ctx, address, byte_count, 1)?;
        Ok(encoding.decode(&bytes))
    }

    pub fn write_value<T: NativeValue, S: NativeSystem + ?Sized>(
        &self,
        ctx: &TransferContext<'_, S>,
        address: u64,
        value: &T,
    ) -> Result<()> {
        ctx.mode.ensure(Direction::Write)?;
        let bytes = value.to_native_bytes()?;
        self.write_bytes(ctx, address, &bytes)
    }

    /// Write `values` back to back. An empty slice is rejected.
    pub fn write_array<T: NativeValue, S: NativeSystem + ?Sized>(
        &self,
        ctx: &TransferContext<'_, S>,
        address: u64,
        values: &[T],
    ) -> Result<()> {
        ctx.mode.ensure(Direction::Write)?;
        if values.is_empty() {
            return Err(Error::invalid_argument("refusing to write an empty array"));
        }
        let bytes = encode_array(values)?;
        self.write_bytes(ctx, address, &bytes)
    }

    pub fn write_string<S: NativeSystem + ?Sized>(
        &self,
        ctx: &TransferContext<'_, S>,
        address: u64,
        text: &str,
        encoding: TextEncoding,
    ) -> Result<()> {
        ctx.mode.ensure(Direction::Write)?;
        let bytes = encoding.encode(text);
        self.write_array(ctx, address, &bytes)
    }
}
