//! Collaborator seams: entity store and validator.

use driftsync_protocol::Entity;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// The entity store the engine synchronizes against.
///
/// The store owns the entities; the engine holds only transient copies for
/// merge and rollback. Implementations are plain keyed CRUD.
pub trait EntityStore: Send + Sync {
    /// Returns the entity with the given id, if present.
    fn get_by_id(&self, id: &str) -> Option<Entity>;

    /// Creates or replaces an entity.
    fn apply_upsert(&self, entity: Entity);

    /// Removes an entity.
    fn apply_delete(&self, id: &str);
}

/// Opaque validation capability for operation payloads.
///
/// Validation failures surface synchronously to the caller before any
/// optimistic apply; invalid input is never queued.
pub trait Validator: Send + Sync {
    /// Validates a value, returning it (possibly normalized) or the issues.
    fn validate(&self, value: &Value) -> Result<Value, Vec<String>>;
}

/// A validator that accepts every input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, value: &Value) -> Result<Value, Vec<String>> {
        Ok(value.clone())
    }
}

/// An in-memory entity store for testing and small hosts.
#[derive(Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<String, Entity>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Returns all entity ids (unordered).
    pub fn ids(&self) -> Vec<String> {
        self.entities.read().keys().cloned().collect()
    }
}

impl EntityStore for MemoryStore {
    fn get_by_id(&self, id: &str) -> Option<Entity> {
        self.entities.read().get(id).cloned()
    }

    fn apply_upsert(&self, entity: Entity) {
        self.entities.write().insert(entity.id.clone(), entity);
    }

    fn apply_delete(&self, id: &str) {
        self.entities.write().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_crud() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.apply_upsert(Entity::from_value("t1", "Todo", json!({"title": "x"}), 1));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_by_id("t1").unwrap().field_str("title"), Some("x"));

        store.apply_upsert(Entity::from_value("t1", "Todo", json!({"title": "y"}), 2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_by_id("t1").unwrap().field_str("title"), Some("y"));

        store.apply_delete("t1");
        assert!(store.get_by_id("t1").is_none());
    }

    #[test]
    fn accept_all_passes_values_through() {
        let value = json!({"title": "x"});
        assert_eq!(AcceptAll.validate(&value).unwrap(), value);
    }
}
