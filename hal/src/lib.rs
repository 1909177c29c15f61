//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the platform services the executive core consumes.
//!
//! ## Philosophy
//!
//! **The platform must be fully abstracted and swappable.**
//!
//! The core never touches raw hardware. Preserved memory, checksums and the
//! reset classification all come through this crate, so the same core runs
//! against flight hardware, a file on a workstation, or RAM in a unit test.
//!
//! ## Design Principles
//!
//! 1. **Trait-based**: Non-volatile access goes through [`NonVolatileMemory`]
//! 2. **Bounded**: Every operation is synchronous and never retried
//! 3. **Testable**: [`RamNvMemory`] and [`FailingNvMemory`] stand in for hardware

pub mod crc;
pub mod failing_nv;
pub mod file_nv;
pub mod nv_memory;
pub mod reset;

pub use crc::{calculate_crc, crc16, crc32, CrcError, CrcType};
pub use failing_nv::{FailingNvMemory, FailurePolicy};
pub use file_nv::FileNvMemory;
pub use nv_memory::{NonVolatileMemory, NvError, RamNvMemory};
pub use reset::ResetType;
