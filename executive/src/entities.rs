//! Names of applications, tasks and libraries
//!
//! Starting and stopping these is someone else's job. The executive core only
//! needs their ids, so that CDS ownership and other per-application state can
//! be expressed and checked.

use core_types::{ResourceError, Result};
use parking_lot::RwLock;
use resources::{ResourceId, ResourceKind, ResourceRegistry};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Entity {
    kind: ResourceKind,
    name: String,
    /// Owning application, for tasks
    parent: Option<ResourceId>,
}

pub(crate) struct EntityTable {
    registry: Arc<ResourceRegistry>,
    max_name_len: usize,
    entities: RwLock<HashMap<ResourceId, Entity>>,
}

impl EntityTable {
    pub fn new(registry: Arc<ResourceRegistry>, max_name_len: usize) -> Self {
        Self {
            registry,
            max_name_len,
            entities: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        kind: ResourceKind,
        name: &str,
        parent: Option<ResourceId>,
    ) -> Result<ResourceId> {
        if name.is_empty() || name.len() > self.max_name_len {
            return Err(ResourceError::BadArgument(format!(
                "{} name must be 1 to {} bytes, got {}",
                kind,
                self.max_name_len,
                name.len()
            )));
        }
        if let Some(parent) = parent {
            if !self.registry.validate(parent, ResourceKind::Application) {
                return Err(ResourceError::HandleInvalid {
                    id: parent.to_integer(),
                });
            }
        }

        let mut entities = self.entities.write();
        if entities.values().any(|e| e.kind == kind && e.name == name) {
            return Err(ResourceError::NameConflict(format!(
                "{} {} already registered",
                kind, name
            )));
        }

        let id = self.registry.allocate(kind)?;
        entities.insert(
            id,
            Entity {
                kind,
                name: name.to_string(),
                parent,
            },
        );
        Ok(id)
    }

    /// Removes an entity, and the tasks of an application with it
    ///
    /// Returns every id that was retired.
    pub fn unregister(&self, id: ResourceId) -> Result<Vec<(ResourceKind, ResourceId)>> {
        let mut entities = self.entities.write();
        let Some(entity) = entities.get(&id).cloned() else {
            return Err(ResourceError::HandleInvalid {
                id: id.to_integer(),
            });
        };

        let mut retired: Vec<(ResourceKind, ResourceId)> = entities
            .iter()
            .filter(|(_, e)| e.parent == Some(id))
            .map(|(&child, e)| (e.kind, child))
            .collect();
        retired.push((entity.kind, id));

        for (_, retired_id) in &retired {
            entities.remove(retired_id);
            self.registry.release(*retired_id)?;
        }
        Ok(retired)
    }

    pub fn lookup(&self, kind: ResourceKind, name: &str) -> Result<ResourceId> {
        self.entities
            .read()
            .iter()
            .find(|(_, e)| e.kind == kind && e.name == name)
            .map(|(&id, _)| id)
            .ok_or_else(|| ResourceError::NotFound(format!("{} {}", kind, name)))
    }

    pub fn name_of(&self, id: ResourceId) -> Result<String> {
        self.entities
            .read()
            .get(&id)
            .map(|e| e.name.clone())
            .ok_or(ResourceError::HandleInvalid {
                id: id.to_integer(),
            })
    }
}
