//! # Core Types
//!
//! This crate defines the types shared by every part of the executive core.
//!
//! ## Philosophy
//!
//! - **Errors are values**: every failure is returned to the caller as a typed
//!   [`ResourceError`]; nothing in the core aborts the process.
//! - **Capacities are explicit**: all tables are sized once, from a
//!   [`PlatformConfig`], before the first resource is handed out.
//!
//! ## Key Types
//!
//! - [`ResourceError`]: The error type returned by every core operation
//! - [`PlatformConfig`]: Table capacities, name limits and default pool layout

pub mod config;
pub mod error;

pub use config::{
    validate_block_sizes, PlatformConfig, DEFAULT_BLOCK_SIZES, MAX_BLOCK_SIZE_CLASSES,
    MAX_TABLE_CAPACITY,
};
pub use error::{ResourceError, Result};
