//! Error types shared by the registry, pools, CDS and counters

use thiserror::Error;

/// Errors returned by executive core operations
///
/// Identifiers are carried in their integer form so that this type does not
/// depend on the registry crate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// Invalid size, alignment, name or other argument
    #[error("Bad argument: {0}")]
    BadArgument(String),

    /// Unknown id, kind mismatch or stale generation
    #[error("Invalid handle: {id:#010x}")]
    HandleInvalid { id: u32 },

    /// A fixed-capacity table or storage area is full
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Request larger than every size class, or the class cannot grow
    #[error("No block size available for a {requested} byte request")]
    BlockSizeUnavailable { requested: usize },

    /// A block header failed its check on free or access
    #[error("Corruption detected: {0}")]
    CorruptionDetected(String),

    /// Stored payload does not match its integrity code
    #[error("Integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    /// Name already registered with incompatible attributes
    #[error("Name conflict: {0}")]
    NameConflict(String),

    /// Name is currently claimed by another live application
    #[error("Owner still active: {0}")]
    OwnerActive(String),

    /// Block does not lie inside the carved region of the pool
    #[error("Buffer not in pool {pool:#010x}")]
    BufferNotInPool { pool: u32 },

    /// An unguarded pool was entered concurrently
    #[error("Pool {pool:#010x} is in use by another context")]
    PoolBusy { pool: u32 },

    /// Lookup by name found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// The platform lacks a required facility
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Backing storage I/O failed
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result alias used throughout the executive core
pub type Result<T> = core::result::Result<T, ResourceError>;

impl ResourceError {
    /// Returns true for errors that indicate detected memory or data corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ResourceError::CorruptionDetected(_) | ResourceError::IntegrityCheckFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_invalid_display() {
        let err = ResourceError::HandleInvalid { id: 0x0301_2004 };
        assert_eq!(err.to_string(), "Invalid handle: 0x03012004");
    }

    #[test]
    fn test_block_size_display() {
        let err = ResourceError::BlockSizeUnavailable { requested: 100 };
        assert!(err.to_string().contains("100 byte"));
    }

    #[test]
    fn test_is_corruption() {
        assert!(ResourceError::CorruptionDetected("hdr".to_string()).is_corruption());
        assert!(ResourceError::IntegrityCheckFailed("cds".to_string()).is_corruption());
        assert!(!ResourceError::NotFound("x".to_string()).is_corruption());
    }
}
