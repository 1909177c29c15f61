//! Checksum primitive
//!
//! Integrity codes for persisted data. CRC-16 is the table-driven
//! CRC-16/ARC used by the flight executive for telemetry-visible checksums;
//! CRC-32 is delegated to `crc32fast`.
//!
//! Both variants accept a running value so that non-contiguous blocks can be
//! checksummed as a single stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CRC algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrcType {
    /// 8-bit CRC (not implemented on this platform)
    Crc8,
    /// CRC-16/ARC (reflected polynomial 0xA001, no final xor)
    Crc16,
    /// CRC-32 (IEEE)
    Crc32,
}

/// Checksum errors
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CrcError {
    #[error("CRC algorithm {0:?} is not supported")]
    Unsupported(CrcType),
}

const CRC16_TABLE: [u16; 256] = crc16_table();

const fn crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Computes a CRC over `data`, continuing from `input_crc`
///
/// Pass 0 as `input_crc` to start a new checksum.
pub fn calculate_crc(data: &[u8], input_crc: u32, crc_type: CrcType) -> Result<u32, CrcError> {
    match crc_type {
        CrcType::Crc16 => Ok(u32::from(crc16(data, input_crc as u16))),
        CrcType::Crc32 => Ok(crc32(data, input_crc)),
        CrcType::Crc8 => Err(CrcError::Unsupported(crc_type)),
    }
}

/// CRC-16/ARC
pub fn crc16(data: &[u8], input_crc: u16) -> u16 {
    data.iter().fold(input_crc, |crc, &byte| {
        (crc >> 8) ^ CRC16_TABLE[usize::from((crc ^ u16::from(byte)) & 0x00FF)]
    })
}

/// CRC-32 (IEEE)
pub fn crc32(data: &[u8], input_crc: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(input_crc);
    hasher.update(data);
    hasher.finalize()
}
