//! Normalized entity changes and presence.

use crate::entity::Entity;
use crate::operation::{EntityIntent, Operation};
use serde::{Deserialize, Serialize};

/// The kind of entity mutation a change describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Entity was created or replaced.
    Upsert,
    /// Entity was deleted.
    Delete,
}

/// A normalized view of one entity mutation.
///
/// Used both on the wire (legacy point-to-point sync) and internally as the
/// representation the conflict resolver operates over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChange {
    /// Kind of mutation.
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Entity type name.
    pub entity_type: String,
    /// Target entity id.
    pub entity_id: String,
    /// New entity value (upserts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Entity>,
    /// Time of the mutation in milliseconds.
    pub timestamp: i64,
    /// Actor that produced the mutation.
    pub user_id: String,
    /// Id of the operation that produced the mutation.
    pub operation_id: u64,
}

impl SyncChange {
    /// Creates an upsert change carrying the new entity value.
    pub fn upsert(entity: Entity, user_id: impl Into<String>, operation_id: u64) -> Self {
        Self {
            change_type: ChangeType::Upsert,
            entity_type: entity.entity_type.clone(),
            entity_id: entity.id.clone(),
            timestamp: entity.updated_at,
            entity: Some(entity),
            user_id: user_id.into(),
            operation_id,
        }
    }

    /// Creates a delete change.
    pub fn delete(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        timestamp: i64,
        user_id: impl Into<String>,
        operation_id: u64,
    ) -> Self {
        Self {
            change_type: ChangeType::Delete,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity: None,
            timestamp,
            user_id: user_id.into(),
            operation_id,
        }
    }

    /// Normalizes an entity-affecting operation into a change.
    ///
    /// Returns `None` for operations with no entity intent.
    pub fn from_operation(operation: &Operation) -> Option<Self> {
        match operation.entity_intent()? {
            EntityIntent::Upsert {
                entity_type,
                entity_id,
                value,
            } => {
                let entity =
                    Entity::from_value(entity_id, entity_type, value, operation.timestamp);
                Some(Self::upsert(entity, operation.client_id.clone(), operation.id))
            }
            EntityIntent::Delete {
                entity_type,
                entity_id,
            } => Some(Self::delete(
                entity_type,
                entity_id,
                operation.timestamp,
                operation.client_id.clone(),
                operation.id,
            )),
        }
    }
}

/// Best-effort presence information.
///
/// Presence is inherently perishable: it is sent only while connected and
/// never queued for later delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
    /// Actor the presence belongs to.
    pub user_id: String,
    /// Free-form status (e.g. "online", "editing:t1").
    pub status: String,
    /// When the presence was captured, in milliseconds.
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_change_from_operation() {
        let op = Operation::upsert(5, "Todo", "t1", json!({"title": "x"}), "c1", 100);
        let change = SyncChange::from_operation(&op).unwrap();

        assert_eq!(change.change_type, ChangeType::Upsert);
        assert_eq!(change.entity_type, "Todo");
        assert_eq!(change.entity_id, "t1");
        assert_eq!(change.operation_id, 5);
        assert_eq!(change.user_id, "c1");
        assert_eq!(change.entity.as_ref().unwrap().field_str("title"), Some("x"));
    }

    #[test]
    fn delete_change_from_operation() {
        let op = Operation::delete(6, "Todo", "t1", "c1", 100);
        let change = SyncChange::from_operation(&op).unwrap();

        assert_eq!(change.change_type, ChangeType::Delete);
        assert!(change.entity.is_none());
        assert_eq!(change.timestamp, 100);
    }

    #[test]
    fn opaque_operation_yields_no_change() {
        let op = Operation::new(7, "compact", vec![], "c1", 100);
        assert!(SyncChange::from_operation(&op).is_none());
    }

    #[test]
    fn change_wire_shape() {
        let entity = Entity::from_value("t1", "Todo", json!({"title": "x"}), 100);
        let change = SyncChange::upsert(entity, "u1", 9);
        let encoded = serde_json::to_value(&change).unwrap();

        assert_eq!(encoded["type"], "upsert");
        assert_eq!(encoded["entityType"], "Todo");
        assert_eq!(encoded["entityId"], "t1");
        assert_eq!(encoded["operationId"], 9);
    }
}
