//! # Failing Non-Volatile Memory
//!
//! A NonVolatileMemory wrapper that can simulate device failures for testing
//! how the critical data store contains them.

use crate::nv_memory::{NonVolatileMemory, NvError};
use std::ops::Range;

/// Policy for when failures should occur
#[derive(Debug, Clone)]
pub enum FailurePolicy {
    /// Never fail (passthrough)
    Never,
    /// Fail every write after N successful writes
    AfterWrites(usize),
    /// Fail writes touching any byte in the range
    OnRange(Range<usize>),
    /// Fail every read
    Reads,
}

/// Wrapper around a NonVolatileMemory that can simulate failures
pub struct FailingNvMemory<D: NonVolatileMemory> {
    inner: D,
    policy: FailurePolicy,
    write_count: usize,
}

impl<D: NonVolatileMemory> FailingNvMemory<D> {
    /// Create a new failing device with the given policy
    pub fn new(inner: D, policy: FailurePolicy) -> Self {
        Self {
            inner,
            policy,
            write_count: 0,
        }
    }

    fn should_fail_write(&self, offset: usize, len: usize) -> bool {
        match &self.policy {
            FailurePolicy::Never | FailurePolicy::Reads => false,
            FailurePolicy::AfterWrites(n) => self.write_count >= *n,
            FailurePolicy::OnRange(range) => {
                offset < range.end && offset.saturating_add(len) > range.start
            }
        }
    }

    /// Get the underlying device (for inspection)
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Number of writes that reached the underlying device
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Reset the failure policy
    pub fn set_policy(&mut self, policy: FailurePolicy) {
        self.policy = policy;
        self.write_count = 0;
    }

    /// Unwraps the underlying device
    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: NonVolatileMemory> NonVolatileMemory for FailingNvMemory<D> {
    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), NvError> {
        if matches!(self.policy, FailurePolicy::Reads) {
            return Err(NvError::Io("injected read failure".to_string()));
        }
        self.inner.read(offset, buffer)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), NvError> {
        if self.should_fail_write(offset, data.len()) {
            return Err(NvError::Io("injected write failure".to_string()));
        }

        self.write_count += 1;
        self.inner.write(offset, data)
    }

    fn flush(&mut self) -> Result<(), NvError> {
        if matches!(self.policy, FailurePolicy::AfterWrites(n) if self.write_count >= n) {
            return Err(NvError::Io("injected flush failure".to_string()));
        }
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nv_memory::RamNvMemory;

    #[test]
    fn test_failing_nv_never() {
        let mut failing = FailingNvMemory::new(RamNvMemory::new(64), FailurePolicy::Never);
        assert!(failing.write(0, &[1; 8]).is_ok());
        assert!(failing.write(8, &[2; 8]).is_ok());
    }

    #[test]
    fn test_failing_nv_after_writes() {
        let mut failing = FailingNvMemory::new(RamNvMemory::new(64), FailurePolicy::AfterWrites(2));
        assert!(failing.write(0, &[1]).is_ok());
        assert!(failing.write(1, &[1]).is_ok());
        assert!(matches!(failing.write(2, &[1]), Err(NvError::Io(_))));
        assert!(failing.flush().is_err());
    }

    #[test]
    fn test_failing_nv_on_range() {
        let mut failing = FailingNvMemory::new(RamNvMemory::new(64), FailurePolicy::OnRange(16..32));
        assert!(failing.write(0, &[0; 16]).is_ok());
        assert!(failing.write(12, &[0; 8]).is_err());
        assert!(failing.write(31, &[0; 1]).is_err());
        assert!(failing.write(32, &[0; 8]).is_ok());
    }

    #[test]
    fn test_failing_nv_reads() {
        let mut failing = FailingNvMemory::new(RamNvMemory::new(64), FailurePolicy::Reads);
        let mut buffer = [0u8; 4];
        assert!(failing.read(0, &mut buffer).is_err());
        assert!(failing.write(0, &buffer).is_ok());
    }

    #[test]
    fn test_failing_nv_set_policy() {
        let mut failing = FailingNvMemory::new(RamNvMemory::new(64), FailurePolicy::Never);
        failing.write(0, &[7]).unwrap();
        assert_eq!(failing.write_count(), 1);

        failing.set_policy(FailurePolicy::AfterWrites(0));
        assert_eq!(failing.write_count(), 0);
        assert!(failing.write(1, &[7]).is_err());
    }
}
