//! Resource audit log
//!
//! Test-visible record of notable resource events: ids handed out and
//! retired, tables running full, corruption caught by pools and the CDS, and
//! how the CDS came up. Entries are ordered by a sequence number; wall-clock
//! time belongs to the time service, not here.
//!
//! The log is diagnostic only and never affects the operation that produced
//! an event.

use hal::ResetType;
use resources::{ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};

/// Resource event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceEvent {
    /// A new id became valid
    IdAllocated { kind: ResourceKind, id: ResourceId },

    /// An id was retired
    IdReleased { kind: ResourceKind, id: ResourceId },

    /// A fixed-capacity table or storage area refused a request
    CapacityExhausted {
        kind: ResourceKind,
        operation: String,
    },

    /// A pool rejected a block with a damaged header
    PoolCorruption { pool: ResourceId, offset: usize },

    /// A CDS block failed its integrity check on restore
    CdsIntegrityFailure { handle: ResourceId },

    /// The CDS finished opening
    CdsOpened {
        reset: ResetType,
        formatted: bool,
        recovered: usize,
        discarded: usize,
    },
}

/// Audit entry with sequence number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAuditEntry {
    pub sequence: u64,
    pub event: ResourceEvent,
}

/// Append-only log of resource events
#[derive(Debug, Default)]
pub struct ResourceAuditLog {
    entries: Vec<ResourceAuditEntry>,
    next_sequence: u64,
}

impl ResourceAuditLog {
    /// Empty log starting at sequence 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `event` with the next sequence number
    pub fn record_event(&mut self, event: ResourceEvent) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(ResourceAuditEntry { sequence, event });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in recording order
    pub fn get_entries(&self) -> &[ResourceAuditEntry] {
        &self.entries
    }

    /// True if some recorded event satisfies `predicate`
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&ResourceEvent) -> bool,
    {
        self.entries.iter().any(|entry| predicate(&entry.event))
    }

    /// Number of recorded events satisfying `predicate`
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ResourceEvent) -> bool,
    {
        self.entries
            .iter()
            .filter(|entry| predicate(&entry.event))
            .count()
    }

    /// Entries that mention `id`
    pub fn entries_for(&self, id: ResourceId) -> Vec<&ResourceAuditEntry> {
        self.entries
            .iter()
            .filter(|entry| match &entry.event {
                ResourceEvent::IdAllocated { id: eid, .. }
                | ResourceEvent::IdReleased { id: eid, .. }
                | ResourceEvent::PoolCorruption { pool: eid, .. }
                | ResourceEvent::CdsIntegrityFailure { handle: eid } => *eid == id,
                ResourceEvent::CapacityExhausted { .. } | ResourceEvent::CdsOpened { .. } => false,
            })
            .collect()
    }

    /// Clears all entries; sequence numbers keep counting
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_log_is_empty() {
        let log = ResourceAuditLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn test_record_and_query() {
        let mut log = ResourceAuditLog::new();
        let id = ResourceId::from_integer(0x0400_1000);

        log.record_event(ResourceEvent::IdAllocated {
            kind: ResourceKind::MemoryPool,
            id,
        });
        log.record_event(ResourceEvent::CapacityExhausted {
            kind: ResourceKind::MemoryPool,
            operation: "create_pool".to_string(),
        });
        log.record_event(ResourceEvent::PoolCorruption { pool: id, offset: 180 });

        assert_eq!(log.len(), 3);
        assert!(log.has_event(|e| matches!(e, ResourceEvent::CapacityExhausted { .. })));
        assert_eq!(
            log.count_events(|e| matches!(e, ResourceEvent::PoolCorruption { .. })),
            1
        );
        assert_eq!(log.entries_for(id).len(), 2);
    }

    #[test]
    fn test_sequence_survives_clear() {
        let mut log = ResourceAuditLog::new();
        let id = ResourceId::from_integer(0x0600_1000);
        log.record_event(ResourceEvent::IdAllocated {
            kind: ResourceKind::GenericCounter,
            id,
        });
        log.clear();
        log.record_event(ResourceEvent::IdReleased {
            kind: ResourceKind::GenericCounter,
            id,
        });
        assert_eq!(log.get_entries()[0].sequence, 1);
    }

    #[test]
    fn test_entries_serialize() {
        let mut log = ResourceAuditLog::new();
        log.record_event(ResourceEvent::CdsOpened {
            reset: ResetType::Processor,
            formatted: false,
            recovered: 3,
            discarded: 0,
        });
        let json = serde_json::to_string(log.get_entries()).unwrap();
        assert!(json.contains("CdsOpened"));
        assert!(json.contains("Processor"));
    }
}
