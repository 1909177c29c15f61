//! # Memory Pool
//!
//! Deterministic block allocation from caller-supplied buffers.
//!
//! ## Philosophy
//!
//! A pool never grows and never coalesces. Requests are rounded up to the
//! smallest configured size class; freed blocks go onto that class's free
//! list and are handed out again before any new memory is carved. Both
//! allocate and free run in bounded time.
//!
//! Each block carries a checked header inside the pool buffer. Freeing a
//! block whose header was overrun, or freeing it twice, is reported as
//! `CorruptionDetected` and counted in the pool statistics; the block is
//! never put back on a free list.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use core_types::PlatformConfig;
//! use memory_pool::PoolManager;
//! use resources::ResourceRegistry;
//!
//! let config = PlatformConfig::default();
//! let registry = Arc::new(ResourceRegistry::new(&config).unwrap());
//! let pools = PoolManager::new(registry, &config.default_block_sizes).unwrap();
//!
//! let pool = pools.create_pool_guarded(vec![0u8; 4096], Some(&[16, 32, 64])).unwrap();
//! let block = pools.allocate(pool, 20).unwrap();
//! assert_eq!(block.size(), 32);
//! assert_eq!(pools.free(pool, block).unwrap(), 32);
//! ```

mod header;
mod manager;
mod pool;
mod stats;

pub use header::BLOCK_HEADER_BYTES;
pub use manager::PoolManager;
pub use pool::{PoolBlock, PoolLocking, POOL_ALIGNMENT, POOL_BOOKKEEPING_BYTES};
pub use stats::{BlockStats, PoolStats};
