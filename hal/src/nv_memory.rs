//! Non-volatile memory abstraction for the critical data store
//!
//! Provides a minimal byte-addressed read/write API over a region that the
//! platform preserves across processor resets. Whether it survives a
//! power-on reset is up to the platform; the core does not rely on it.

use core_types::ResourceError;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Non-volatile memory errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NvError {
    /// Access extends past the end of the region
    #[error("access of {len} bytes at offset {offset} is out of bounds")]
    OutOfBounds { offset: usize, len: usize },
    /// I/O error (hardware failure, timeout, file error)
    #[error("I/O error: {0}")]
    Io(String),
    /// Region not available on this platform
    #[error("non-volatile region not ready")]
    NotReady,
}

impl From<NvError> for ResourceError {
    fn from(err: NvError) -> Self {
        match err {
            NvError::NotReady => ResourceError::NotSupported(err.to_string()),
            other => ResourceError::Storage(other.to_string()),
        }
    }
}

/// Non-volatile memory trait
///
/// Implementers provide bounded-latency synchronous access to a fixed-size
/// region. Operations are never retried by callers.
pub trait NonVolatileMemory {
    /// Total size of the region in bytes
    fn capacity(&self) -> usize;

    /// Reads `buffer.len()` bytes starting at `offset`
    ///
    /// # Errors
    /// Returns `NvError::OutOfBounds` if the range exceeds `capacity()`
    /// Returns `NvError::Io` on device failure
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), NvError>;

    /// Writes `data` starting at `offset`
    ///
    /// # Errors
    /// Returns `NvError::OutOfBounds` if the range exceeds `capacity()`
    /// Returns `NvError::Io` on device failure
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), NvError>;

    /// Makes previous writes durable
    fn flush(&mut self) -> Result<(), NvError> {
        Ok(())
    }
}

impl<T: NonVolatileMemory + ?Sized> NonVolatileMemory for Box<T> {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), NvError> {
        (**self).read(offset, buffer)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), NvError> {
        (**self).write(offset, data)
    }

    fn flush(&mut self) -> Result<(), NvError> {
        (**self).flush()
    }
}

pub(crate) fn check_range(offset: usize, len: usize, capacity: usize) -> Result<(), NvError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(NvError::OutOfBounds { offset, len }),
    }
}

/// RAM-backed non-volatile region
///
/// Models battery-backed or reserved RAM: clones share the same bytes, so a
/// clone kept outside an executive instance sees the region exactly as the
/// next instance will after a processor reset. Contents are lost when the
/// last clone is dropped.
#[derive(Debug, Clone)]
pub struct RamNvMemory {
    region: Arc<Mutex<Vec<u8>>>,
}

impl RamNvMemory {
    /// Creates a zero-filled region of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            region: Arc::new(Mutex::new(vec![0u8; capacity])),
        }
    }

    /// Creates a region with a capacity in kibibytes
    pub fn with_capacity_kb(kb: usize) -> Self {
        Self::new(kb * 1024)
    }

    /// Copies the current contents out (for inspection)
    pub fn snapshot(&self) -> Vec<u8> {
        self.region.lock().clone()
    }

    /// Inverts one bit in place, bypassing any integrity bookkeeping
    ///
    /// Used to simulate radiation upsets and other silent corruption.
    pub fn flip_bit(&self, offset: usize, bit: u8) {
        let mut region = self.region.lock();
        if let Some(byte) = region.get_mut(offset) {
            *byte ^= 1 << (bit % 8);
        }
    }

    /// Zeroes the whole region, as a power-on reset would
    pub fn wipe(&self) {
        self.region.lock().fill(0);
    }
}

impl NonVolatileMemory for RamNvMemory {
    fn capacity(&self) -> usize {
        self.region.lock().len()
    }

    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), NvError> {
        let region = self.region.lock();
        check_range(offset, buffer.len(), region.len())?;
        buffer.copy_from_slice(&region[offset..offset + buffer.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), NvError> {
        let mut region = self.region.lock();
        check_range(offset, data.len(), region.len())?;
        region[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}
