//! A single block pool over an owned buffer

use crate::header::{BlockHeader, BlockState, HeaderFault, BLOCK_HEADER_BYTES};
use crate::stats::{BlockStats, PoolStats};
use core_types::{ResourceError, Result};
use parking_lot::{Mutex, MutexGuard};
use resources::ResourceId;

/// Bytes at the start of every pool buffer reserved for the pool descriptor
pub const POOL_BOOKKEEPING_BYTES: usize = 168;

/// Required alignment of pool buffers and granularity of carved blocks
pub const POOL_ALIGNMENT: usize = 4;

const DESCRIPTOR_MAGIC: u32 = 0x4C4F_4F50;

/// Whether a pool serializes access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolLocking {
    /// Operations take the pool lock
    Guarded,
    /// Operations never wait; a second concurrent caller gets `PoolBusy`
    Unguarded,
}

/// A block handed out by a pool
///
/// Carries no pointer: the pool id, the offset of the usable bytes inside the
/// pool buffer, and the class size. Data is reached through the
/// [`PoolManager`](crate::PoolManager) block accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolBlock {
    pool: ResourceId,
    offset: usize,
    size: usize,
}

impl PoolBlock {
    /// Pool the block came from
    pub fn pool(&self) -> ResourceId {
        self.pool
    }

    /// Offset of the first usable byte within the pool buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Usable bytes (the class size)
    pub fn size(&self) -> usize {
        self.size
    }
}

#[derive(Debug)]
struct SizeClass {
    size: usize,
    created: usize,
    /// Header offsets of blocks available for reuse
    free_list: Vec<usize>,
}

#[derive(Debug)]
struct PoolState {
    buffer: Box<[u8]>,
    classes: Vec<SizeClass>,
    /// First byte never carved into a block
    next_unused: usize,
    blocks_allocated: u32,
    check_errors: u32,
}

pub(crate) struct MemoryPool {
    id: ResourceId,
    locking: PoolLocking,
    state: Mutex<PoolState>,
}

fn align_up(value: usize) -> usize {
    (value + POOL_ALIGNMENT - 1) & !(POOL_ALIGNMENT - 1)
}

impl MemoryPool {
    /// Builds a pool; `class_sizes` must already be validated and sorted
    pub fn new(
        id: ResourceId,
        buffer: Box<[u8]>,
        class_sizes: &[usize],
        locking: PoolLocking,
    ) -> Self {
        let mut state = PoolState {
            buffer,
            classes: class_sizes
                .iter()
                .map(|&size| SizeClass {
                    size,
                    created: 0,
                    free_list: Vec::new(),
                })
                .collect(),
            next_unused: POOL_BOOKKEEPING_BYTES,
            blocks_allocated: 0,
            check_errors: 0,
        };
        state.write_descriptor(id);

        Self {
            id,
            locking,
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn locking(&self) -> PoolLocking {
        self.locking
    }

    fn state(&self) -> Result<MutexGuard<'_, PoolState>> {
        match self.locking {
            PoolLocking::Guarded => Ok(self.state.lock()),
            PoolLocking::Unguarded => self.state.try_lock().ok_or_else(|| ResourceError::PoolBusy {
                pool: self.id.to_integer(),
            }),
        }
    }

    pub fn allocate(&self, size: usize) -> Result<PoolBlock> {
        let mut state = self.state()?;

        let Some(class_index) = state.classes.iter().position(|c| c.size >= size) else {
            return Err(ResourceError::BlockSizeUnavailable { requested: size });
        };
        let class_size = state.classes[class_index].size;

        let header_offset = match state.classes[class_index].free_list.pop() {
            Some(offset) => offset,
            None => {
                let footprint = align_up(BLOCK_HEADER_BYTES + class_size);
                if state.buffer.len() - state.next_unused < footprint {
                    tracing::warn!(
                        pool = %self.id,
                        class_size,
                        free_bytes = state.buffer.len() - state.next_unused,
                        "Pool exhausted"
                    );
                    return Err(ResourceError::BlockSizeUnavailable { requested: size });
                }
                let offset = state.next_unused;
                state.next_unused += footprint;
                state.classes[class_index].created += 1;
                offset
            }
        };

        state.write_header(
            header_offset,
            BlockHeader {
                pool_id: self.id.to_integer(),
                class_index: class_index as u16,
                state: BlockState::Allocated,
            },
        );
        state.blocks_allocated = state.blocks_allocated.wrapping_add(1);

        Ok(PoolBlock {
            pool: self.id,
            offset: header_offset + BLOCK_HEADER_BYTES,
            size: class_size,
        })
    }

    /// Returns a block to its class free list, yielding the class size
    ///
    /// A block whose header fails any check is counted and left exactly
    /// where it is.
    pub fn free(&self, block: PoolBlock) -> Result<usize> {
        let mut state = self.state()?;

        let (header_offset, class_index) = match state.check_block(self.id, block) {
            Ok(found) => found,
            Err(err @ ResourceError::CorruptionDetected(_)) => {
                state.check_errors = state.check_errors.wrapping_add(1);
                tracing::warn!(
                    pool = %self.id,
                    offset = block.offset,
                    check_errors = state.check_errors,
                    "Corrupt block header on free"
                );
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        state.write_header(
            header_offset,
            BlockHeader {
                pool_id: self.id.to_integer(),
                class_index: class_index as u16,
                state: BlockState::Free,
            },
        );
        let class = &mut state.classes[class_index];
        class.free_list.push(header_offset);
        Ok(class.size)
    }

    pub fn buffer_info(&self, block: PoolBlock) -> Result<usize> {
        let state = self.state()?;
        let (_, class_index) = state.check_block(self.id, block)?;
        Ok(state.classes[class_index].size)
    }

    /// Runs `f` over the usable bytes of an allocated block
    pub(crate) fn with_block_mut<R>(
        &self,
        block: PoolBlock,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let mut state = self.state()?;
        let (header_offset, class_index) = state.check_block(self.id, block)?;
        let start = header_offset + BLOCK_HEADER_BYTES;
        let end = start + state.classes[class_index].size;
        Ok(f(&mut state.buffer[start..end]))
    }

    pub fn stats(&self) -> Result<PoolStats> {
        let state = self.state()?;
        Ok(PoolStats {
            pool_size: state.buffer.len(),
            blocks_allocated: state.blocks_allocated,
            check_errors: state.check_errors,
            free_bytes: state.buffer.len() - state.next_unused,
            classes: state
                .classes
                .iter()
                .map(|c| BlockStats {
                    block_size: c.size,
                    created: c.created,
                    free: c.free_list.len(),
                })
                .collect(),
        })
    }

    pub fn into_buffer(self) -> Box<[u8]> {
        self.state.into_inner().buffer
    }

    #[cfg(test)]
    pub(crate) fn corrupt_byte(&self, offset: usize) {
        self.state.lock().buffer[offset] ^= 0xFF;
    }
}

impl PoolState {
    /// Records the pool id, size and class table in the bookkeeping area
    fn write_descriptor(&mut self, id: ResourceId) {
        let mut words = vec![
            DESCRIPTOR_MAGIC,
            id.to_integer(),
            self.buffer.len() as u32,
            self.classes.len() as u32,
        ];
        words.extend(self.classes.iter().map(|c| c.size as u32));

        for (slot, word) in self.buffer[..POOL_BOOKKEEPING_BYTES]
            .chunks_exact_mut(4)
            .zip(words)
        {
            slot.copy_from_slice(&word.to_le_bytes());
        }
    }

    fn write_header(&mut self, offset: usize, header: BlockHeader) {
        self.buffer[offset..offset + BLOCK_HEADER_BYTES].copy_from_slice(&header.encode());
    }

    /// Locates and verifies the header of an allocated block
    ///
    /// Returns the header offset and class index.
    fn check_block(&self, pool: ResourceId, block: PoolBlock) -> Result<(usize, usize)> {
        let not_in_pool = || ResourceError::BufferNotInPool {
            pool: pool.to_integer(),
        };

        if block.pool != pool {
            return Err(not_in_pool());
        }
        let header_offset = block
            .offset
            .checked_sub(BLOCK_HEADER_BYTES)
            .filter(|&offset| offset >= POOL_BOOKKEEPING_BYTES)
            .ok_or_else(not_in_pool)?;
        if header_offset % POOL_ALIGNMENT != 0
            || block.offset.saturating_add(block.size) > self.next_unused
        {
            return Err(not_in_pool());
        }

        let mut raw = [0u8; BLOCK_HEADER_BYTES];
        raw.copy_from_slice(&self.buffer[header_offset..block.offset]);

        let corrupt = |what: String| {
            ResourceError::CorruptionDetected(format!(
                "block at offset {} in pool {}: {}",
                block.offset, pool, what
            ))
        };

        let header = BlockHeader::decode(&raw).map_err(|fault| match fault {
            HeaderFault::BadCheck => corrupt("header check value mismatch".to_string()),
            HeaderFault::BadMarker(marker) => corrupt(format!("unknown marker {:#06x}", marker)),
        })?;

        if header.pool_id != pool.to_integer() {
            return Err(corrupt(format!("owned by pool {:#010x}", header.pool_id)));
        }
        if header.state != BlockState::Allocated {
            return Err(corrupt("block is not allocated".to_string()));
        }
        let class_index = usize::from(header.class_index);
        match self.classes.get(class_index) {
            Some(class) if class.size == block.size => Ok((header_offset, class_index)),
            _ => Err(corrupt(format!("bad size class {}", class_index))),
        }
    }
}
