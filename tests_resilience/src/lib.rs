//! Resilience Test Utilities
//!
//! Shared helpers for the cross-crate tests in `tests/`.
//!
//! ## Test Philosophy
//!
//! - **Stale ids never work**: a retired id is rejected by every service
//! - **Corruption is contained**: damaged pool headers and CDS records are
//!   reported and left alone, never followed
//! - **Resets are survivable**: CDS contents come back after a processor
//!   reset with the same handles
//! - **Limits are hard**: fixed tables refuse requests instead of growing

use core_types::{PlatformConfig, Result};
use executive::Executive;
use hal::{RamNvMemory, ResetType};

/// Size of the RAM region used by [`boot_on`]
pub const TEST_NV_KB: usize = 64;

/// Boots an executive on a clone of `nv`
///
/// Clones share their bytes, so a later boot on the same `nv` sees what this
/// one wrote.
pub fn boot_on(nv: &RamNvMemory, reset: ResetType) -> Result<Executive> {
    boot_with_config(PlatformConfig::default(), nv, reset)
}

pub fn boot_with_config(
    config: PlatformConfig,
    nv: &RamNvMemory,
    reset: ResetType,
) -> Result<Executive> {
    Executive::boot(config, Some(Box::new(nv.clone())), reset)
}

/// Fresh region and an executive after a power-on reset
pub fn cold_boot() -> Result<(RamNvMemory, Executive)> {
    let nv = RamNvMemory::with_capacity_kb(TEST_NV_KB);
    let exec = boot_on(&nv, ResetType::PowerOn)?;
    Ok((nv, exec))
}

/// Deterministic payload of `len` bytes seeded by `seed`
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add((i as u8).wrapping_mul(31)))
        .collect()
}
