//! Reset classification reported by the platform at startup

use core::fmt;
use serde::{Deserialize, Serialize};

/// Kind of reset the processor is starting from
///
/// Only a processor reset promises that the non-volatile region still holds
/// what was written before the reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetType {
    /// Cold start; preserved memory must be treated as garbage
    PowerOn,
    /// Warm restart; preserved memory is expected to be intact
    Processor,
}

impl ResetType {
    /// Returns true if preserved memory may be trusted after this reset
    pub fn preserves_memory(&self) -> bool {
        matches!(self, ResetType::Processor)
    }
}

impl fmt::Display for ResetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetType::PowerOn => write!(f, "power-on"),
            ResetType::Processor => write!(f, "processor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_memory() {
        assert!(ResetType::Processor.preserves_memory());
        assert!(!ResetType::PowerOn.preserves_memory());
    }

    #[test]
    fn test_display() {
        assert_eq!(ResetType::PowerOn.to_string(), "power-on");
        assert_eq!(ResetType::Processor.to_string(), "processor");
    }
}
