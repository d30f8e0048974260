//! Endpoint and channel messages.

use crate::change::{PresenceInfo, SyncChange};
use crate::entity::Entity;
use crate::operation::{Confirmation, Operation};
use serde::{Deserialize, Serialize};

/// Batch submission to the operations endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationsRequest {
    /// Operations in client submission order.
    pub operations: Vec<Operation>,
}

impl OperationsRequest {
    /// Creates a request for a batch of operations.
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }
}

/// Response from the operations endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationsResponse {
    /// One confirmation per submitted operation.
    pub confirmations: Vec<Confirmation>,
}

impl OperationsResponse {
    /// Creates a response.
    pub fn new(confirmations: Vec<Confirmation>) -> Self {
        Self { confirmations }
    }
}

/// State reconciliation request.
///
/// Carries the client's last-known version token; a server without one
/// responds with a full snapshot, otherwise with a delta patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRequest {
    /// Last version token the client holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_version: Option<String>,
    /// Time of the client's last successful sync, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_timestamp: Option<i64>,
}

impl StateRequest {
    /// Creates a request from the client's last-known position.
    pub fn new(state_version: Option<String>, last_sync_timestamp: Option<i64>) -> Self {
        Self {
            state_version,
            last_sync_timestamp,
        }
    }
}

/// An absolute description of entities changed or deleted since a version.
///
/// Patches encode absolute entity states, not diffs, so applying the same
/// patch twice yields the same entity set as applying it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    /// Server-assigned opaque version token.
    pub state_version: String,
    /// Entities changed since the requested version.
    pub entities: Vec<Entity>,
    /// Ids of entities deleted since the requested version.
    pub deleted_entity_ids: Vec<String>,
    /// Server time of the patch, in milliseconds.
    pub sync_timestamp: i64,
}

impl StatePatch {
    /// Creates a patch.
    pub fn new(
        state_version: impl Into<String>,
        entities: Vec<Entity>,
        deleted_entity_ids: Vec<String>,
        sync_timestamp: i64,
    ) -> Self {
        Self {
            state_version: state_version.into(),
            entities,
            deleted_entity_ids,
            sync_timestamp,
        }
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.deleted_entity_ids.is_empty()
    }
}

/// Lightweight out-of-band push notifications.
///
/// The push channel stays thin: it signals that something changed and the
/// request/response channel remains authoritative for payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// Server state advanced; the client should reconcile.
    StateChanged,
    /// An operation was confirmed out-of-band.
    OperationConfirmed {
        /// The confirmation payload.
        payload: Confirmation,
    },
}

/// Messages on the live duplex connection (legacy path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LiveMessage {
    /// A remote entity mutation.
    #[serde(rename = "sync-change")]
    SyncChange {
        /// The change payload.
        data: SyncChange,
    },
    /// A presence update from another actor.
    #[serde(rename = "presence-update")]
    PresenceUpdate {
        /// The presence payload.
        data: PresenceInfo,
    },
}
