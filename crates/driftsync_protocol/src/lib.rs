//! # Driftsync Protocol
//!
//! Wire types and the merge algorithm for driftsync.
//!
//! This crate provides:
//! - `Entity` and `Operation` for client-stamped mutations
//! - `SyncChange` as the normalized view of one entity mutation
//! - Endpoint request/response messages and channel message enums
//! - The field-level merge algorithm used for conflict resolution
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod entity;
mod merge;
mod messages;
mod operation;

pub use change::{ChangeType, PresenceInfo, SyncChange};
pub use entity::{now_millis, Entity};
pub use merge::{fold_merge, merge_entities, sort_by_timestamp};
pub use messages::{
    LiveMessage, OperationsRequest, OperationsResponse, PushMessage, StatePatch, StateRequest,
};
pub use operation::{ConfirmedOperation, Confirmation, EntityIntent, Operation};
