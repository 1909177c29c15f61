//! Pool table keyed by registry ids

use crate::pool::{MemoryPool, PoolBlock, PoolLocking, POOL_ALIGNMENT, POOL_BOOKKEEPING_BYTES};
use crate::stats::PoolStats;
use core_types::{validate_block_sizes, ResourceError, Result};
use parking_lot::RwLock;
use resources::{ResourceId, ResourceKind, ResourceRegistry};
use std::sync::Arc;

/// Owns every memory pool
///
/// Pools are found through the registry: an operation first turns its pool id
/// into a table index via [`ResourceRegistry::to_index`], so deleted or stale
/// ids are rejected before any pool state is touched.
pub struct PoolManager {
    registry: Arc<ResourceRegistry>,
    default_block_sizes: Vec<usize>,
    pools: RwLock<Vec<Option<MemoryPool>>>,
}

impl PoolManager {
    /// Creates an empty pool table sized from the registry
    pub fn new(registry: Arc<ResourceRegistry>, default_block_sizes: &[usize]) -> Result<Self> {
        validate_block_sizes(default_block_sizes)?;
        let mut default_block_sizes = default_block_sizes.to_vec();
        default_block_sizes.sort_unstable();

        let capacity = registry.capacity(ResourceKind::MemoryPool);
        Ok(Self {
            registry,
            default_block_sizes,
            pools: RwLock::new((0..capacity).map(|_| None).collect()),
        })
    }

    /// Creates a pool over `buffer`
    ///
    /// The buffer must start on a word boundary and be a whole number of
    /// words long, and must be larger than [`POOL_BOOKKEEPING_BYTES`].
    /// `class_sizes` falls back to the platform defaults; an explicit table
    /// may be in any order.
    pub fn create_pool(
        &self,
        buffer: impl Into<Box<[u8]>>,
        class_sizes: Option<&[usize]>,
        locking: PoolLocking,
    ) -> Result<ResourceId> {
        let buffer = buffer.into();

        if buffer.as_ptr() as usize % POOL_ALIGNMENT != 0 {
            return Err(ResourceError::BadArgument(
                "pool buffer is not word aligned".to_string(),
            ));
        }
        if buffer.len() % POOL_ALIGNMENT != 0 {
            return Err(ResourceError::BadArgument(format!(
                "pool size {} is not a whole number of words",
                buffer.len()
            )));
        }
        if buffer.len() <= POOL_BOOKKEEPING_BYTES {
            return Err(ResourceError::BadArgument(format!(
                "pool size {} leaves no room after {} bytes of bookkeeping",
                buffer.len(),
                POOL_BOOKKEEPING_BYTES
            )));
        }
        if buffer.len() > u32::MAX as usize {
            return Err(ResourceError::BadArgument(format!(
                "pool size {} too large",
                buffer.len()
            )));
        }

        let class_sizes = match class_sizes {
            Some(sizes) => {
                validate_block_sizes(sizes)?;
                let mut sizes = sizes.to_vec();
                sizes.sort_unstable();
                sizes
            }
            None => self.default_block_sizes.clone(),
        };

        let size = buffer.len();
        let mut pools = self.pools.write();
        let id = self.registry.allocate(ResourceKind::MemoryPool)?;
        let index = self.registry.to_index(id, ResourceKind::MemoryPool)?;
        pools[index] = Some(MemoryPool::new(id, buffer, &class_sizes, locking));

        tracing::debug!(
            pool = %id,
            size,
            classes = class_sizes.len(),
            ?locking,
            "Memory pool created"
        );
        Ok(id)
    }

    /// Creates a pool whose operations serialize on a pool lock
    pub fn create_pool_guarded(
        &self,
        buffer: impl Into<Box<[u8]>>,
        class_sizes: Option<&[usize]>,
    ) -> Result<ResourceId> {
        self.create_pool(buffer, class_sizes, PoolLocking::Guarded)
    }

    /// Creates a pool that never waits for a lock
    pub fn create_pool_unguarded(
        &self,
        buffer: impl Into<Box<[u8]>>,
        class_sizes: Option<&[usize]>,
    ) -> Result<ResourceId> {
        self.create_pool(buffer, class_sizes, PoolLocking::Unguarded)
    }

    /// Deletes a pool and hands its buffer back
    ///
    /// Blocks still outstanding become unusable: every later call with this
    /// pool id fails `HandleInvalid`.
    pub fn delete_pool(&self, pool: ResourceId) -> Result<Box<[u8]>> {
        let mut pools = self.pools.write();
        let index = self.registry.to_index(pool, ResourceKind::MemoryPool)?;
        let entry = match pools[index].take() {
            Some(entry) if entry.id() == pool => entry,
            other => {
                pools[index] = other;
                return Err(ResourceError::HandleInvalid {
                    id: pool.to_integer(),
                });
            }
        };
        self.registry.release(pool)?;

        tracing::debug!(pool = %pool, "Memory pool deleted");
        Ok(entry.into_buffer())
    }

    /// Allocates a block of at least `size` usable bytes
    pub fn allocate(&self, pool: ResourceId, size: usize) -> Result<PoolBlock> {
        self.with_pool(pool, |p| p.allocate(size))
    }

    /// Frees a block, returning the bytes released to its class
    pub fn free(&self, pool: ResourceId, block: PoolBlock) -> Result<usize> {
        self.with_pool(pool, |p| p.free(block))
    }

    /// Usable size of an allocated block
    pub fn buffer_info(&self, pool: ResourceId, block: PoolBlock) -> Result<usize> {
        self.with_pool(pool, |p| p.buffer_info(block))
    }

    /// Copies `data` into a block starting `offset` bytes in
    pub fn write_block(
        &self,
        pool: ResourceId,
        block: PoolBlock,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        self.with_block_mut(pool, block, |bytes| -> Result<()> {
            let dest = range_in(bytes.len(), offset, data.len())?;
            bytes[dest].copy_from_slice(data);
            Ok(())
        })?
    }

    /// Copies bytes out of a block starting `offset` bytes in
    pub fn read_block(
        &self,
        pool: ResourceId,
        block: PoolBlock,
        offset: usize,
        out: &mut [u8],
    ) -> Result<()> {
        self.with_block_mut(pool, block, |bytes| -> Result<()> {
            let src = range_in(bytes.len(), offset, out.len())?;
            out.copy_from_slice(&bytes[src]);
            Ok(())
        })?
    }

    /// Runs `f` over the usable bytes of an allocated block
    ///
    /// `f` runs with the pool table and the pool itself locked and must not
    /// call back into the manager. Callers outside the crate copy through
    /// [`PoolManager::read_block`] and [`PoolManager::write_block`].
    pub(crate) fn with_block_mut<R>(
        &self,
        pool: ResourceId,
        block: PoolBlock,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        self.with_pool(pool, |p| p.with_block_mut(block, f))
    }

    /// Current statistics of a pool
    pub fn stats(&self, pool: ResourceId) -> Result<PoolStats> {
        self.with_pool(pool, |p| p.stats())
    }

    /// Locking mode a pool was created with
    pub fn locking(&self, pool: ResourceId) -> Result<PoolLocking> {
        self.with_pool(pool, |p| Ok(p.locking()))
    }

    /// Ids of every live pool
    pub fn pool_ids(&self) -> Vec<ResourceId> {
        self.registry.active_ids(ResourceKind::MemoryPool)
    }

    fn with_pool<R>(&self, pool: ResourceId, f: impl FnOnce(&MemoryPool) -> Result<R>) -> Result<R> {
        let index = self.registry.to_index(pool, ResourceKind::MemoryPool)?;
        let pools = self.pools.read();
        match pools.get(index).and_then(Option::as_ref) {
            Some(entry) if entry.id() == pool => f(entry),
            _ => Err(ResourceError::HandleInvalid {
                id: pool.to_integer(),
            }),
        }
    }
}

fn range_in(len: usize, offset: usize, count: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(ResourceError::BadArgument(format!(
            "{} bytes at offset {} exceed block size {}",
            count, offset, len
        ))),
    }
}
