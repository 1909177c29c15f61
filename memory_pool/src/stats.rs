//! Pool statistics for telemetry

use serde::{Deserialize, Serialize};

/// Counts for one size class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    /// Usable bytes in each block of this class
    pub block_size: usize,
    /// Blocks ever carved for this class
    pub created: usize,
    /// Blocks currently on the class free list
    pub free: usize,
}

/// Snapshot of a pool's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total size of the pool buffer
    pub pool_size: usize,
    /// Successful allocations since creation
    pub blocks_allocated: u32,
    /// Corrupted headers seen on free
    pub check_errors: u32,
    /// Bytes never carved into a block
    pub free_bytes: usize,
    /// One entry per size class, smallest first
    pub classes: Vec<BlockStats>,
}

impl PoolStats {
    /// Blocks handed out and not yet freed
    pub fn blocks_in_use(&self) -> usize {
        self.classes.iter().map(|c| c.created - c.free).sum()
    }

    /// Stats for the class serving `block_size`, if the pool has one
    pub fn class(&self, block_size: usize) -> Option<&BlockStats> {
        self.classes.iter().find(|c| c.block_size == block_size)
    }
}
