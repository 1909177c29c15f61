//! # Generic Counters
//!
//! Named 32-bit counters that any task can bump and telemetry can read.
//!
//! Counter ids come from the resource registry and every operation checks
//! the id there first. Values are atomics, so concurrent increments are never
//! lost, but nothing orders a `set` against an `increment` from another task.

use core_types::{PlatformConfig, ResourceError, Result};
use parking_lot::RwLock;
use resources::{ResourceId, ResourceKind, ResourceRegistry};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Counter {
    id: ResourceId,
    name: String,
    value: AtomicU32,
}

/// Point-in-time view of one counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterInfo {
    pub id: ResourceId,
    pub name: String,
    pub value: u32,
}

/// Table of generic counters
pub struct CounterTable {
    registry: Arc<ResourceRegistry>,
    max_name_len: usize,
    counters: RwLock<Vec<Option<Counter>>>,
}

impl CounterTable {
    /// Creates an empty table sized from the registry
    pub fn new(registry: Arc<ResourceRegistry>, config: &PlatformConfig) -> Self {
        let capacity = registry.capacity(ResourceKind::GenericCounter);
        Self {
            registry,
            max_name_len: config.max_api_name_len,
            counters: RwLock::new((0..capacity).map(|_| None).collect()),
        }
    }

    /// Registers a counter starting at zero
    pub fn register(&self, name: &str) -> Result<ResourceId> {
        if name.is_empty() || name.len() > self.max_name_len {
            return Err(ResourceError::BadArgument(format!(
                "counter name must be 1 to {} bytes, got {}",
                self.max_name_len,
                name.len()
            )));
        }

        let mut counters = self.counters.write();
        if counters.iter().flatten().any(|c| c.name == name) {
            return Err(ResourceError::NameConflict(format!(
                "counter {} already registered",
                name
            )));
        }

        let id = self.registry.allocate(ResourceKind::GenericCounter)?;
        let index = self.registry.to_index(id, ResourceKind::GenericCounter)?;
        counters[index] = Some(Counter {
            id,
            name: name.to_string(),
            value: AtomicU32::new(0),
        });

        tracing::debug!(counter = %id, name, "Generic counter registered");
        Ok(id)
    }

    /// Removes a counter; its id becomes invalid
    pub fn delete(&self, id: ResourceId) -> Result<()> {
        let mut counters = self.counters.write();
        let index = self.registry.to_index(id, ResourceKind::GenericCounter)?;
        match counters[index].take() {
            Some(counter) if counter.id == id => {
                self.registry.release(id)?;
                tracing::debug!(counter = %id, name = %counter.name, "Generic counter deleted");
                Ok(())
            }
            other => {
                counters[index] = other;
                Err(invalid(id))
            }
        }
    }

    /// Adds one, wrapping at `u32::MAX`
    pub fn increment(&self, id: ResourceId) -> Result<()> {
        self.with_counter(id, |c| {
            c.value.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Overwrites the value
    pub fn set(&self, id: ResourceId, value: u32) -> Result<()> {
        self.with_counter(id, |c| c.value.store(value, Ordering::Relaxed))
    }

    /// Current value
    pub fn get(&self, id: ResourceId) -> Result<u32> {
        self.with_counter(id, |c| c.value.load(Ordering::Relaxed))
    }

    /// Id of the counter registered under `name`
    pub fn lookup_by_name(&self, name: &str) -> Result<ResourceId> {
        self.counters
            .read()
            .iter()
            .flatten()
            .find(|c| c.name == name)
            .map(|c| c.id)
            .ok_or_else(|| ResourceError::NotFound(format!("counter {}", name)))
    }

    /// Name a counter was registered under
    pub fn name_of(&self, id: ResourceId) -> Result<String> {
        self.with_counter(id, |c| c.name.clone())
    }

    /// Every registered counter, in table order
    pub fn snapshot(&self) -> Vec<CounterInfo> {
        self.counters
            .read()
            .iter()
            .flatten()
            .map(|c| CounterInfo {
                id: c.id,
                name: c.name.clone(),
                value: c.value.load(Ordering::Relaxed),
            })
            .collect()
    }

    fn with_counter<R>(&self, id: ResourceId, f: impl FnOnce(&Counter) -> R) -> Result<R> {
        let index = self.registry.to_index(id, ResourceKind::GenericCounter)?;
        let counters = self.counters.read();
        match counters.get(index).and_then(Option::as_ref) {
            Some(counter) if counter.id == id => Ok(f(counter)),
            _ => Err(invalid(id)),
        }
    }
}

fn invalid(id: ResourceId) -> ResourceError {
    ResourceError::HandleInvalid {
        id: id.to_integer(),
    }
}
