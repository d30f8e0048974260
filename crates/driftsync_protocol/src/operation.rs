//! Client operations and server confirmations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An immutable, named, client-stamped unit of intended change.
///
/// Operations are created on user intent, queued or batched, sent, and then
/// either confirmed (discarded) or rejected (rolled back). Ids are monotonic
/// per client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Monotonically increasing per-client operation id.
    pub id: u64,
    /// Operation name (e.g. "upsertTodo").
    pub name: String,
    /// Ordered argument list.
    pub args: Vec<Value>,
    /// Id of the client that created the operation.
    pub client_id: String,
    /// Client-stamped creation time in milliseconds.
    pub timestamp: i64,
}

impl Operation {
    /// Creates a new operation.
    pub fn new(
        id: u64,
        name: impl Into<String>,
        args: Vec<Value>,
        client_id: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            args,
            client_id: client_id.into(),
            timestamp,
        }
    }

    /// Creates an `upsert<Type>` operation for an entity.
    pub fn upsert(
        id: u64,
        entity_type: &str,
        entity_id: impl Into<String>,
        value: Value,
        client_id: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self::new(
            id,
            format!("upsert{entity_type}"),
            vec![Value::String(entity_id.into()), value],
            client_id,
            timestamp,
        )
    }

    /// Creates a `delete<Type>` operation for an entity.
    pub fn delete(
        id: u64,
        entity_type: &str,
        entity_id: impl Into<String>,
        client_id: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self::new(
            id,
            format!("delete{entity_type}"),
            vec![Value::String(entity_id.into())],
            client_id,
            timestamp,
        )
    }

    /// Interprets the operation name and arguments as an entity mutation.
    ///
    /// Operations named `upsert<Type>` or `delete<Type>` with the entity id
    /// as their first argument map onto an [`EntityIntent`]; anything else
    /// returns `None` and is opaque to the optimistic-update machinery.
    pub fn entity_intent(&self) -> Option<EntityIntent> {
        if let Some(entity_type) = self.name.strip_prefix("upsert") {
            let entity_id = self.args.first()?.as_str()?.to_string();
            let value = self.args.get(1)?.clone();
            return Some(EntityIntent::Upsert {
                entity_type: entity_type.to_string(),
                entity_id,
                value,
            });
        }
        if let Some(entity_type) = self.name.strip_prefix("delete") {
            let entity_id = self.args.first()?.as_str()?.to_string();
            return Some(EntityIntent::Delete {
                entity_type: entity_type.to_string(),
                entity_id,
            });
        }
        None
    }
}

/// The entity-level meaning of an operation, if it has one.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityIntent {
    /// The operation creates or replaces an entity.
    Upsert {
        /// Entity type parsed from the operation name.
        entity_type: String,
        /// Target entity id.
        entity_id: String,
        /// New entity value.
        value: Value,
    },
    /// The operation deletes an entity.
    Delete {
        /// Entity type parsed from the operation name.
        entity_type: String,
        /// Target entity id.
        entity_id: String,
    },
}

impl EntityIntent {
    /// Returns the target entity id.
    pub fn entity_id(&self) -> &str {
        match self {
            EntityIntent::Upsert { entity_id, .. } => entity_id,
            EntityIntent::Delete { entity_id, .. } => entity_id,
        }
    }
}

/// The server's verdict on one submitted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    /// Id of the operation being confirmed.
    pub operation_id: u64,
    /// Client that submitted the operation.
    pub client_id: String,
    /// Whether the server accepted the operation.
    pub success: bool,
    /// Server-assigned timestamp in milliseconds.
    pub server_timestamp: i64,
    /// Rejection detail when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Confirmation {
    /// Creates a successful confirmation.
    pub fn success(operation_id: u64, client_id: impl Into<String>, server_timestamp: i64) -> Self {
        Self {
            operation_id,
            client_id: client_id.into(),
            success: true,
            server_timestamp,
            error: None,
        }
    }

    /// Creates a rejection.
    pub fn rejected(
        operation_id: u64,
        client_id: impl Into<String>,
        server_timestamp: i64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            operation_id,
            client_id: client_id.into(),
            success: false,
            server_timestamp,
            error: Some(error.into()),
        }
    }
}

/// An operation the server has accepted, with its server timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedOperation {
    /// The original operation.
    pub operation: Operation,
    /// Server-assigned timestamp in milliseconds.
    pub server_timestamp: i64,
}

impl ConfirmedOperation {
    /// Pairs an operation with its confirmation timestamp.
    pub fn new(operation: Operation, server_timestamp: i64) -> Self {
        Self {
            operation,
            server_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_intent() {
        let op = Operation::upsert(1, "Todo", "t1", json!({"title": "Buy milk"}), "c1", 100);
        assert_eq!(op.name, "upsertTodo");

        match op.entity_intent() {
            Some(EntityIntent::Upsert {
                entity_type,
                entity_id,
                value,
            }) => {
                assert_eq!(entity_type, "Todo");
                assert_eq!(entity_id, "t1");
                assert_eq!(value["title"], "Buy milk");
            }
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn delete_intent() {
        let op = Operation::delete(2, "Todo", "t1", "c1", 100);
        assert_eq!(op.name, "deleteTodo");
        assert_eq!(
            op.entity_intent(),
            Some(EntityIntent::Delete {
                entity_type: "Todo".into(),
                entity_id: "t1".into(),
            })
        );
    }

    #[test]
    fn opaque_operation_has_no_intent() {
        let op = Operation::new(3, "recalculateTotals", vec![], "c1", 100);
        assert_eq!(op.entity_intent(), None);

        // upsert without a value argument is also opaque
        let op = Operation::new(4, "upsertTodo", vec![json!("t1")], "c1", 100);
        assert_eq!(op.entity_intent(), None);
    }

    #[test]
    fn operation_wire_names() {
        let op = Operation::upsert(1, "Todo", "t1", json!({}), "c1", 100);
        let encoded = serde_json::to_value(&op).unwrap();
        assert_eq!(encoded["clientId"], "c1");
        assert_eq!(encoded["args"][0], "t1");
    }

    #[test]
    fn confirmation_roundtrip() {
        let ok = Confirmation::success(7, "c1", 500);
        let bytes = serde_json::to_vec(&ok).unwrap();
        let decoded: Confirmation = serde_json::from_slice(&bytes).unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.operation_id, 7);
        assert!(decoded.error.is_none());

        let rejected = Confirmation::rejected(8, "c1", 501, "title too long");
        let bytes = serde_json::to_vec(&rejected).unwrap();
        let decoded: Confirmation = serde_json::from_slice(&bytes).unwrap();
        assert!(!decoded.success);
        assert_eq!(decoded.error.as_deref(), Some("title too long"));
    }
}
