//! # Resources
//!
//! Identity for everything the executive manages.
//!
//! ## Philosophy
//!
//! - **Opaque handles**: a [`ResourceId`] cannot be used as an index or
//!   compared by magnitude; only the registry can look inside it
//! - **Generations**: releasing a slot and handing it out again yields an id
//!   that never equals the old one, so stale handles are caught
//! - **Fixed tables**: every kind has a capacity fixed at startup
//!
//! ## Example
//!
//! ```
//! use core_types::PlatformConfig;
//! use resources::{ResourceKind, ResourceRegistry};
//!
//! let registry = ResourceRegistry::new(&PlatformConfig::default()).unwrap();
//! let id = registry.allocate(ResourceKind::GenericCounter).unwrap();
//! assert!(registry.validate(id, ResourceKind::GenericCounter));
//!
//! registry.release(id).unwrap();
//! assert!(!registry.validate(id, ResourceKind::GenericCounter));
//! ```

pub mod id;
pub mod registry;

pub use id::{ResourceId, ResourceKind};
pub use registry::ResourceRegistry;
