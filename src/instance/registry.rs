//! In-memory registry of known game server instances.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use uuid::Uuid;

use super::types::GameServerInstance;
use crate::error::{AgentError, Result};
use crate::snapshot::{read_json_or_default, write_json};

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<Uuid, GameServerInstance>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from `GameServerState.json`.
    pub fn load_snapshot(path: &Path) -> Self {
        let instances: HashMap<Uuid, GameServerInstance> = read_json_or_default(path);
        if !instances.is_empty() {
            log::info!("Restored {} game server(s) from {:?}", instances.len(), path);
        }
        Self {
            instances: RwLock::new(instances),
        }
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        write_json(path, &*instances)
    }

    pub fn get(&self, id: &Uuid) -> Option<GameServerInstance> {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn require(&self, id: &Uuid) -> Result<GameServerInstance> {
        self.get(id)
            .ok_or_else(|| AgentError::instance_not_found(&id.to_string()))
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// Insert or replace an instance.
    pub fn upsert(&self, instance: GameServerInstance) {
        self.instances
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(instance.id, instance);
    }

    /// Mutate a registered instance in place, returning the closure's result.
    pub fn update<F, T>(&self, id: &Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut GameServerInstance) -> T,
    {
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| AgentError::instance_not_found(&id.to_string()))?;
        Ok(f(instance))
    }

    pub fn remove(&self, id: &Uuid) -> Option<GameServerInstance> {
        self.instances
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    pub fn list(&self) -> Vec<GameServerInstance> {
        let mut list: Vec<_> = self
            .instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        list
    }

    pub fn len(&self) -> usize {
        self.instances.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
