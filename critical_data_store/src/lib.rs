//! # Critical Data Store
//!
//! Named blocks of application state kept in a non-volatile region so they
//! survive a processor reset.
//!
//! ## Philosophy
//!
//! - **Names, not addresses**: applications register `AppName.BlockName` and
//!   get the same handle back after a warm restart
//! - **Detect, don't hide**: every block carries a CRC-32; a restore always
//!   copies what is stored and reports a mismatch instead of refusing
//! - **Trust the reset type**: a power-on reset formats the region, a
//!   processor reset recovers it
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use core_types::PlatformConfig;
//! use critical_data_store::{CdsBlockKind, CriticalDataStore};
//! use hal::{RamNvMemory, ResetType};
//! use resources::{ResourceKind, ResourceRegistry};
//!
//! let config = PlatformConfig::default().with_max_cds_entries(16);
//! let registry = Arc::new(ResourceRegistry::new(&config).unwrap());
//! let app = registry.allocate(ResourceKind::Application).unwrap();
//!
//! let cds = CriticalDataStore::open(
//!     RamNvMemory::with_capacity_kb(8),
//!     registry,
//!     &config,
//!     ResetType::PowerOn,
//! )
//! .unwrap();
//!
//! let registration = cds.register(app, "App.Blk", 8, CdsBlockKind::Data).unwrap();
//! assert!(registration.is_new());
//! let handle = registration.handle();
//! cds.save(handle, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
//!
//! let mut out = [0u8; 8];
//! cds.restore(handle, &mut out).unwrap();
//! assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
//! ```

mod extent;
mod layout;
mod name;
mod store;

pub use layout::MAX_FULL_NAME_LEN;
pub use name::CdsName;
pub use store::{
    CdsBlockKind, CdsHandle, CdsRecoveryReport, CdsRegistration, CdsRegistryRecord,
    CriticalDataStore,
};
