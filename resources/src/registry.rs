//! Resource identity registry
//!
//! One fixed-capacity slot table per [`ResourceKind`], sized once from the
//! [`PlatformConfig`]. The tables are the single source of truth for whether
//! an id is live: pools, CDS entries and counters keep their own records but
//! always ask the registry first.

use crate::id::{ResourceId, ResourceKind, GENERATION_MASK};
use core_types::{PlatformConfig, ResourceError, Result};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Claimed but not yet valid
    Reserved,
    Active,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u16,
    state: SlotState,
}

impl Slot {
    const EMPTY: Slot = Slot {
        generation: 0,
        state: SlotState::Free,
    };
}

#[derive(Debug)]
struct SlotTable {
    kind: ResourceKind,
    slots: Vec<Slot>,
}

impl SlotTable {
    fn new(kind: ResourceKind, capacity: usize) -> Self {
        Self {
            kind,
            slots: vec![Slot::EMPTY; capacity],
        }
    }

    fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state != SlotState::Free)
            .count()
    }

    /// Returns the slot an id refers to if its generation still matches
    fn lookup(&self, id: ResourceId) -> Option<&Slot> {
        self.slots
            .get(id.slot_index())
            .filter(|slot| slot.generation == id.generation())
    }

    fn lookup_mut(&mut self, id: ResourceId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.slot_index())
            .filter(|slot| slot.generation == id.generation())
    }
}

/// Issues, validates and retires resource ids
///
/// Every call takes the registry lock for one short critical section, so a
/// registry can be shared between threads behind an `Arc`.
#[derive(Debug)]
pub struct ResourceRegistry {
    tables: Mutex<Vec<SlotTable>>,
}

impl ResourceRegistry {
    /// Creates a registry with one table per kind, sized from `config`
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        config.validate()?;

        let tables = ResourceKind::ALL
            .iter()
            .map(|&kind| SlotTable::new(kind, capacity_for(config, kind)))
            .collect();

        Ok(Self {
            tables: Mutex::new(tables),
        })
    }

    /// Allocates a new, immediately valid id of `kind`
    pub fn allocate(&self, kind: ResourceKind) -> Result<ResourceId> {
        let id = self.reserve(kind)?;
        self.activate(id)?;
        Ok(id)
    }

    /// Claims the first free slot of `kind` without making it valid
    ///
    /// The slot's generation is advanced here, so the returned id never
    /// matches anything handed out for this slot before. Finish with
    /// [`activate`](Self::activate), or give the slot back with
    /// [`release`](Self::release).
    pub fn reserve(&self, kind: ResourceKind) -> Result<ResourceId> {
        let mut tables = self.tables.lock();
        let table = &mut tables[kind.ordinal()];
        let capacity = table.slots.len();

        let Some((index, slot)) = table
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.state == SlotState::Free)
        else {
            tracing::warn!(%kind, capacity, "Resource table full");
            return Err(ResourceError::CapacityExceeded(format!(
                "{} table full ({} slots)",
                kind, capacity
            )));
        };

        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
        slot.state = SlotState::Reserved;
        Ok(ResourceId::compose(kind, index, slot.generation))
    }

    /// Makes a reserved id valid
    pub fn activate(&self, id: ResourceId) -> Result<()> {
        let kind = id.kind().ok_or_else(|| invalid(id))?;
        let mut tables = self.tables.lock();
        match tables[kind.ordinal()].lookup_mut(id) {
            Some(slot) if slot.state == SlotState::Reserved => {
                slot.state = SlotState::Active;
                tracing::debug!(%kind, %id, "Resource id activated");
                Ok(())
            }
            _ => Err(invalid(id)),
        }
    }

    /// Returns true if `id` is of `kind`, its slot is active and the
    /// generation matches
    pub fn validate(&self, id: ResourceId, kind: ResourceKind) -> bool {
        self.to_index(id, kind).is_ok()
    }

    /// Zero-based table index of a valid id
    ///
    /// This is the only way to turn an id into an index.
    pub fn to_index(&self, id: ResourceId, kind: ResourceKind) -> Result<usize> {
        if id.kind() != Some(kind) {
            return Err(invalid(id));
        }
        let tables = self.tables.lock();
        match tables[kind.ordinal()].lookup(id) {
            Some(slot) if slot.state == SlotState::Active => Ok(id.slot_index()),
            _ => Err(invalid(id)),
        }
    }

    /// Frees the slot behind a valid or reserved id
    ///
    /// The generation is left alone; the next allocation of the slot
    /// advances it, which is what invalidates `id`.
    pub fn release(&self, id: ResourceId) -> Result<()> {
        let kind = id.kind().ok_or_else(|| invalid(id))?;
        let mut tables = self.tables.lock();
        match tables[kind.ordinal()].lookup_mut(id) {
            Some(slot) if slot.state != SlotState::Free => {
                slot.state = SlotState::Free;
                tracing::debug!(%kind, %id, "Resource id released");
                Ok(())
            }
            _ => Err(invalid(id)),
        }
    }

    /// Re-occupies the exact slot and generation encoded in a persisted id
    ///
    /// Used when state that outlives the registry (the critical data store)
    /// is reattached after a processor reset, so that handles held before the
    /// reset stay equal to the ones handed out after it.
    pub fn reclaim(&self, id: ResourceId, kind: ResourceKind) -> Result<()> {
        if id.kind() != Some(kind) {
            return Err(invalid(id));
        }
        let mut tables = self.tables.lock();
        let table = &mut tables[kind.ordinal()];
        match table.slots.get_mut(id.slot_index()) {
            Some(slot) if slot.state == SlotState::Free => {
                slot.generation = id.generation();
                slot.state = SlotState::Active;
                tracing::debug!(%kind, %id, "Resource id reclaimed");
                Ok(())
            }
            _ => Err(invalid(id)),
        }
    }

    /// Number of reserved or active slots of `kind`
    pub fn in_use(&self, kind: ResourceKind) -> usize {
        self.tables.lock()[kind.ordinal()].in_use()
    }

    /// Total slots of `kind`
    pub fn capacity(&self, kind: ResourceKind) -> usize {
        self.tables.lock()[kind.ordinal()].slots.len()
    }

    /// Every currently valid id of `kind`, in slot order
    pub fn active_ids(&self, kind: ResourceKind) -> Vec<ResourceId> {
        let tables = self.tables.lock();
        let table = &tables[kind.ordinal()];
        table
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Active)
            .map(|(index, slot)| ResourceId::compose(table.kind, index, slot.generation))
            .collect()
    }
}

fn capacity_for(config: &PlatformConfig, kind: ResourceKind) -> usize {
    match kind {
        ResourceKind::Application => config.max_applications,
        ResourceKind::Task => config.max_tasks,
        ResourceKind::Library => config.max_libraries,
        ResourceKind::MemoryPool => config.max_memory_pools,
        ResourceKind::CdsBlock => config.max_cds_entries,
        ResourceKind::GenericCounter => config.max_generic_counters,
    }
}

fn invalid(id: ResourceId) -> ResourceError {
    ResourceError::HandleInvalid {
        id: id.to_integer(),
    }
}
