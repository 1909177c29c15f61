//! Opaque resource identifiers
//!
//! A [`ResourceId`] packs three fields into one 32-bit value:
//!
//! | bits  | field      |
//! |-------|------------|
//! | 24–31 | kind tag   |
//! | 12–23 | generation |
//! | 0–11  | slot index |
//!
//! The layout is private. Outside this crate an id can only be compared for
//! equality, converted to and from its integer form, and turned into a table
//! index through [`ResourceRegistry::to_index`](crate::ResourceRegistry::to_index),
//! which checks the kind and liveness first.

use core::fmt;
use core_types::MAX_TABLE_CAPACITY;
use serde::{Deserialize, Serialize};

const KIND_SHIFT: u32 = 24;
const GENERATION_SHIFT: u32 = 12;
pub(crate) const GENERATION_MASK: u16 = 0x0FFF;
const INDEX_MASK: u32 = 0x0FFF;

const _: () = assert!(MAX_TABLE_CAPACITY == (INDEX_MASK as usize) + 1);

/// Category of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceKind {
    Application = 1,
    Task = 2,
    Library = 3,
    MemoryPool = 4,
    CdsBlock = 5,
    GenericCounter = 6,
}

impl ResourceKind {
    /// Every kind, in tag order
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Application,
        ResourceKind::Task,
        ResourceKind::Library,
        ResourceKind::MemoryPool,
        ResourceKind::CdsBlock,
        ResourceKind::GenericCounter,
    ];

    pub(crate) fn tag(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }

    /// Position of this kind in [`ResourceKind::ALL`]
    pub(crate) fn ordinal(self) -> usize {
        usize::from(self.tag() - 1)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Application => "application",
            ResourceKind::Task => "task",
            ResourceKind::Library => "library",
            ResourceKind::MemoryPool => "memory pool",
            ResourceKind::CdsBlock => "CDS block",
            ResourceKind::GenericCounter => "generic counter",
        };
        write!(f, "{}", name)
    }
}

/// Opaque identifier for a registry-managed resource
///
/// The all-zero value is [`ResourceId::UNDEFINED`], which is also what a
/// zero-initialized or defaulted id holds. [`ResourceId::RESERVED`] marks
/// table entries under construction. Neither is ever returned by allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(u32);

impl ResourceId {
    /// Id that refers to nothing
    pub const UNDEFINED: ResourceId = ResourceId(0);

    /// Id that marks an entry being set up; never valid for any kind
    pub const RESERVED: ResourceId = ResourceId(0xFFFF_FFFF);

    pub(crate) fn compose(kind: ResourceKind, index: usize, generation: u16) -> Self {
        debug_assert!(index < MAX_TABLE_CAPACITY);
        Self(
            (u32::from(kind.tag()) << KIND_SHIFT)
                | (u32::from(generation & GENERATION_MASK) << GENERATION_SHIFT)
                | (index as u32 & INDEX_MASK),
        )
    }

    /// Integer form, for display, logging and serialization only
    ///
    /// The value must not be compared against table bounds or used as an
    /// index; go through the registry for that.
    pub fn to_integer(self) -> u32 {
        self.0
    }

    /// Rebuilds an id from its integer form
    ///
    /// Total and lossless; the result may well be invalid, which the
    /// registry will report when the id is used.
    pub fn from_integer(value: u32) -> Self {
        Self(value)
    }

    /// Returns false only for [`ResourceId::UNDEFINED`]
    pub fn is_defined(self) -> bool {
        self != Self::UNDEFINED
    }

    pub(crate) fn kind(self) -> Option<ResourceKind> {
        ResourceKind::from_tag((self.0 >> KIND_SHIFT) as u8)
    }

    pub(crate) fn slot_index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    pub(crate) fn generation(self) -> u16 {
        ((self.0 >> GENERATION_SHIFT) as u16) & GENERATION_MASK
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({:#010x})", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
