//! On-NV layout of the critical data store
//!
//! ```text
//! 0                      "_CDSBeg_"
//! 8                      superblock, JSON, zero padded to 128 bytes
//! 136                    registry table, one 64 byte record per entry
//! data_start             data area, each entry [payload][crc32 LE]
//! capacity - 8           "_CDSEnd_"
//! ```
//!
//! Registry records are fixed-size binary so a single entry can be rewritten
//! in place; each carries its own CRC and a damaged record only loses that
//! entry.

use core_types::{ResourceError, Result};
use resources::ResourceId;
use serde::{Deserialize, Serialize};

pub(crate) const BEGIN_SIGNATURE: &[u8; 8] = b"_CDSBeg_";
pub(crate) const END_SIGNATURE: &[u8; 8] = b"_CDSEnd_";
const SIGNATURE_LEN: usize = 8;
pub(crate) const SUPERBLOCK_LEN: usize = 128;
pub(crate) const RECORD_LEN: usize = 64;
pub(crate) const CRC_LEN: usize = 4;

/// Longest full block name a registry record can hold
pub const MAX_FULL_NAME_LEN: usize = 40;

const NAME_OFFSET: usize = 18;
const RECORD_CRC_OFFSET: usize = RECORD_LEN - CRC_LEN;
const FLAG_IN_USE: u8 = 0x01;
const FLAG_CRITICAL_TABLE: u8 = 0x02;

const CDS_MAGIC: u32 = 0x4344_5331; // "CDS1"
const CDS_VERSION: u32 = 1;

/// Offsets derived from the region size and registry capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CdsLayout {
    pub capacity: usize,
    pub max_entries: usize,
}

impl CdsLayout {
    pub fn new(capacity: usize, max_entries: usize) -> Result<Self> {
        let layout = Self {
            capacity,
            max_entries,
        };
        let overhead = layout.data_start() + SIGNATURE_LEN;
        if capacity <= overhead {
            return Err(ResourceError::BadArgument(format!(
                "CDS region of {} bytes cannot hold a {} entry registry ({} bytes)",
                capacity, max_entries, overhead
            )));
        }
        Ok(layout)
    }

    pub fn superblock_offset(&self) -> usize {
        SIGNATURE_LEN
    }

    pub fn record_offset(&self, index: usize) -> usize {
        SIGNATURE_LEN + SUPERBLOCK_LEN + index * RECORD_LEN
    }

    pub fn table_len(&self) -> usize {
        self.max_entries * RECORD_LEN
    }

    pub fn data_start(&self) -> usize {
        self.record_offset(self.max_entries)
    }

    pub fn data_end(&self) -> usize {
        self.capacity - SIGNATURE_LEN
    }

    pub fn end_signature_offset(&self) -> usize {
        self.data_end()
    }
}

/// Bytes an entry of `size` occupies in the data area
pub(crate) fn entry_footprint(size: usize) -> usize {
    (size + CRC_LEN + 3) & !3
}

/// Region header written at format time and checked on every warm open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Superblock {
    magic: u32,
    version: u32,
    max_entries: usize,
    data_start: usize,
    data_end: usize,
}

impl Superblock {
    pub fn for_layout(layout: &CdsLayout) -> Self {
        Self {
            magic: CDS_MAGIC,
            version: CDS_VERSION,
            max_entries: layout.max_entries,
            data_start: layout.data_start(),
            data_end: layout.data_end(),
        }
    }

    pub fn encode(&self) -> Result<[u8; SUPERBLOCK_LEN]> {
        let json = serde_json::to_vec(self)
            .map_err(|e| ResourceError::Storage(format!("CDS superblock: {}", e)))?;
        if json.len() > SUPERBLOCK_LEN {
            return Err(ResourceError::Storage(format!(
                "CDS superblock needs {} bytes",
                json.len()
            )));
        }
        let mut bytes = [0u8; SUPERBLOCK_LEN];
        bytes[..json.len()].copy_from_slice(&json);
        Ok(bytes)
    }

    /// Parses a stored superblock; `None` if unreadable
    pub fn decode(bytes: &[u8; SUPERBLOCK_LEN]) -> Option<Self> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(SUPERBLOCK_LEN);
        serde_json::from_slice(&bytes[..end]).ok()
    }

    /// Checks that a stored superblock describes `layout`
    pub fn describes(&self, layout: &CdsLayout) -> bool {
        *self == Self::for_layout(layout)
    }
}

pub(crate) fn signatures_intact(begin: &[u8; 8], end: &[u8; 8]) -> bool {
    begin == BEGIN_SIGNATURE && end == END_SIGNATURE
}

/// One registry table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegistryRecord {
    pub handle: ResourceId,
    pub size: usize,
    pub offset: usize,
    pub critical_table: bool,
    pub name: String,
}

/// Why a stored record was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordFault {
    BadCrc,
    BadName,
}

impl RegistryRecord {
    /// Encodes the record; `name` must fit [`MAX_FULL_NAME_LEN`]
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0..4].copy_from_slice(&self.handle.to_integer().to_le_bytes());
        bytes[4..8].copy_from_slice(&(self.size as u32).to_le_bytes());
        bytes[8..12].copy_from_slice(&(self.offset as u32).to_le_bytes());
        let mut flags = FLAG_IN_USE;
        if self.critical_table {
            flags |= FLAG_CRITICAL_TABLE;
        }
        bytes[16] = flags;

        let name = self.name.as_bytes();
        let name_len = name.len().min(MAX_FULL_NAME_LEN);
        bytes[17] = name_len as u8;
        bytes[NAME_OFFSET..NAME_OFFSET + name_len].copy_from_slice(&name[..name_len]);

        let crc = crc32fast::hash(&bytes[..RECORD_CRC_OFFSET]);
        bytes[RECORD_CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Decodes a stored record; `Ok(None)` for an unused slot
    pub fn decode(bytes: &[u8; RECORD_LEN]) -> core::result::Result<Option<Self>, RecordFault> {
        if bytes[16] & FLAG_IN_USE == 0 {
            return Ok(None);
        }

        let stored_crc = read_u32(bytes, RECORD_CRC_OFFSET);
        if stored_crc != crc32fast::hash(&bytes[..RECORD_CRC_OFFSET]) {
            return Err(RecordFault::BadCrc);
        }

        let name_len = usize::from(bytes[17]);
        if name_len > MAX_FULL_NAME_LEN {
            return Err(RecordFault::BadName);
        }
        let name = core::str::from_utf8(&bytes[NAME_OFFSET..NAME_OFFSET + name_len])
            .map_err(|_| RecordFault::BadName)?
            .to_string();

        Ok(Some(Self {
            handle: ResourceId::from_integer(read_u32(bytes, 0)),
            size: read_u32(bytes, 4) as usize,
            offset: read_u32(bytes, 8) as usize,
            critical_table: bytes[16] & FLAG_CRITICAL_TABLE != 0,
            name,
        }))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RegistryRecord {
        RegistryRecord {
            handle: ResourceId::from_integer(0x0500_1003),
            size: 24,
            offset: 4096,
            critical_table: true,
            name: "SAMPLE_APP.State".to_string(),
        }
    }

    #[test]
    fn test_layout_offsets() {
        let layout = CdsLayout::new(8192, 4).unwrap();
        assert_eq!(layout.superblock_offset(), 8);
        assert_eq!(layout.record_offset(0), 136);
        assert_eq!(layout.data_start(), 136 + 4 * RECORD_LEN);
        assert_eq!(layout.data_end(), 8184);
        assert!(CdsLayout::new(layout.data_start() + 8, 4).is_err());
    }

    #[test]
    fn test_footprint_is_word_rounded() {
        assert_eq!(entry_footprint(8), 12);
        assert_eq!(entry_footprint(9), 16);
        assert_eq!(entry_footprint(1), 8);
    }

    #[test]
    fn test_superblock_round_trip() {
        let layout = CdsLayout::new(16384, 8).unwrap();
        let superblock = Superblock::for_layout(&layout);
        let bytes = superblock.encode().unwrap();
        let decoded = Superblock::decode(&bytes).unwrap();
        assert!(decoded.describes(&layout));
        assert!(!decoded.describes(&CdsLayout::new(16384, 9).unwrap()));
        assert_eq!(Superblock::decode(&[0u8; SUPERBLOCK_LEN]), None);
    }

    #[test]
    fn test_record_round_trip() {
        let record = record();
        assert_eq!(RegistryRecord::decode(&record.encode()), Ok(Some(record)));
    }

    #[test]
    fn test_empty_record() {
        assert_eq!(RegistryRecord::decode(&[0u8; RECORD_LEN]), Ok(None));
    }

    #[test]
    fn test_damaged_record_rejected() {
        let mut bytes = record().encode();
        bytes[NAME_OFFSET + 2] ^= 0x20;
        assert_eq!(RegistryRecord::decode(&bytes), Err(RecordFault::BadCrc));
    }

    #[test]
    fn test_signatures() {
        assert!(signatures_intact(BEGIN_SIGNATURE, END_SIGNATURE));
        assert!(!signatures_intact(END_SIGNATURE, BEGIN_SIGNATURE));
    }
}
