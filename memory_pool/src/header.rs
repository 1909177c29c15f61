//! Block header encoding
//!
//! Every carved block is preceded by a 12 byte header stored in the pool
//! buffer itself, little-endian:
//!
//! ```text
//! [0..4)   owning pool id
//! [4..6)   size class index
//! [6..8)   state marker (allocated / free)
//! [8..12)  check value over the three fields above
//! ```
//!
//! Overruns from the previous block land here first, which is what makes
//! them detectable on free.

/// Bytes of header in front of every block
pub const BLOCK_HEADER_BYTES: usize = 12;

const CHECK_MAGIC: u32 = 0x5A3C_96E1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum BlockState {
    Allocated = 0xAAAA,
    Free = 0xDDDD,
}

impl BlockState {
    fn from_marker(marker: u16) -> Option<Self> {
        match marker {
            0xAAAA => Some(BlockState::Allocated),
            0xDDDD => Some(BlockState::Free),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub pool_id: u32,
    pub class_index: u16,
    pub state: BlockState,
}

/// Why a header was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderFault {
    BadCheck,
    BadMarker(u16),
}

fn check_value(pool_id: u32, class_index: u16, marker: u16) -> u32 {
    CHECK_MAGIC ^ pool_id ^ ((u32::from(class_index) << 16) | u32::from(marker))
}

impl BlockHeader {
    pub fn encode(&self) -> [u8; BLOCK_HEADER_BYTES] {
        let marker = self.state as u16;
        let mut bytes = [0u8; BLOCK_HEADER_BYTES];
        bytes[0..4].copy_from_slice(&self.pool_id.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.class_index.to_le_bytes());
        bytes[6..8].copy_from_slice(&marker.to_le_bytes());
        bytes[8..12].copy_from_slice(&check_value(self.pool_id, self.class_index, marker).to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; BLOCK_HEADER_BYTES]) -> Result<Self, HeaderFault> {
        let pool_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let class_index = u16::from_le_bytes([bytes[4], bytes[5]]);
        let marker = u16::from_le_bytes([bytes[6], bytes[7]]);
        let check = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        if check != check_value(pool_id, class_index, marker) {
            return Err(HeaderFault::BadCheck);
        }
        let state = BlockState::from_marker(marker).ok_or(HeaderFault::BadMarker(marker))?;

        Ok(Self {
            pool_id,
            class_index,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = BlockHeader {
            pool_id: 0x0400_1000,
            class_index: 3,
            state: BlockState::Allocated,
        };
        assert_eq!(BlockHeader::decode(&header.encode()), Ok(header));
    }

    #[test]
    fn test_any_single_bit_flip_is_rejected() {
        let header = BlockHeader {
            pool_id: 0x0400_2001,
            class_index: 1,
            state: BlockState::Free,
        };
        let clean = header.encode();
        for byte in 0..BLOCK_HEADER_BYTES {
            for bit in 0..8 {
                let mut bytes = clean;
                bytes[byte] ^= 1 << bit;
                assert!(BlockHeader::decode(&bytes).is_err(), "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn test_unknown_marker_with_valid_check() {
        let marker = 0x1234u16;
        let mut bytes = [0u8; BLOCK_HEADER_BYTES];
        bytes[6..8].copy_from_slice(&marker.to_le_bytes());
        bytes[8..12].copy_from_slice(&check_value(0, 0, marker).to_le_bytes());
        assert_eq!(
            BlockHeader::decode(&bytes),
            Err(HeaderFault::BadMarker(0x1234))
        );
    }

    #[test]
    fn test_zeroed_header_is_rejected() {
        assert!(BlockHeader::decode(&[0u8; BLOCK_HEADER_BYTES]).is_err());
    }
}
