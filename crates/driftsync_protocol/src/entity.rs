//! Typed entities.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A typed entity owned by the local store.
///
/// Identity is `id`; a mutation replaces `data` and `updated_at` wholesale.
/// The sync engine holds only transient copies for merge and rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique entity identifier.
    pub id: String,
    /// Entity type name (e.g. "Todo").
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Open field map.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Last modification time in milliseconds.
    pub updated_at: i64,
}

impl Entity {
    /// Creates a new entity.
    pub fn new(
        id: impl Into<String>,
        entity_type: impl Into<String>,
        data: Map<String, Value>,
        updated_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            data,
            updated_at,
        }
    }

    /// Builds an entity from an arbitrary JSON value.
    ///
    /// Objects become the field map directly; any other value is stored
    /// under a single `"value"` field.
    pub fn from_value(
        id: impl Into<String>,
        entity_type: impl Into<String>,
        value: Value,
        updated_at: i64,
    ) -> Self {
        let data = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        Self::new(id, entity_type, data, updated_at)
    }

    /// Returns a field value by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Returns a field as a string slice, if it is a string.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_object_value() {
        let entity = Entity::from_value("t1", "Todo", json!({"title": "Buy milk"}), 100);
        assert_eq!(entity.id, "t1");
        assert_eq!(entity.entity_type, "Todo");
        assert_eq!(entity.field_str("title"), Some("Buy milk"));
        assert_eq!(entity.updated_at, 100);
    }

    #[test]
    fn from_scalar_value() {
        let entity = Entity::from_value("c1", "Counter", json!(7), 1);
        assert_eq!(entity.field("value"), Some(&json!(7)));
    }

    #[test]
    fn wire_field_names() {
        let entity = Entity::from_value("t1", "Todo", json!({}), 42);
        let encoded = serde_json::to_value(&entity).unwrap();
        assert_eq!(encoded["type"], "Todo");
        assert_eq!(encoded["updatedAt"], 42);
    }

    #[test]
    fn json_roundtrip() {
        let entity = Entity::from_value("t1", "Todo", json!({"title": "x", "done": false}), 5);
        let bytes = serde_json::to_vec(&entity).unwrap();
        let decoded: Entity = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, entity);
    }

    #[test]
    fn now_millis_is_positive() {
        assert!(now_millis() > 0);
    }
}
