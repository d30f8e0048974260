//! # Driftsync Engine
//!
//! Client-side synchronization engine for typed entities.
//!
//! This crate provides:
//! - Offline operation queue with bounded capacity
//! - Connection lifecycle with exponential-backoff reconnection
//! - Optimistic apply and rollback of local operations
//! - Batched operation submission with retry
//! - State-version reconciliation
//! - Conflict resolution for concurrent multi-actor edits
//! - Typed publish/subscribe events
//!
//! ## Architecture
//!
//! One [`SyncCoordinator`] per engine instance orchestrates everything:
//! user intent becomes an [`driftsync_protocol::Operation`], is applied
//! optimistically, queued or batched, submitted, and finally committed or
//! rolled back when the server answers. Remote changes flow back through
//! the [`ConflictResolver`] before reaching the local store.
//!
//! ## Key Invariants
//!
//! - An operation id lives in at most one of queue, batch, pending set
//! - An entity has at most one optimistic-update record at a time
//! - State patches are absolute, so applying one is idempotent
//! - Offline queueing is success, not an error

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod coordinator;
mod error;
mod events;
mod http;
mod queue;
mod resolver;
mod retry;
mod store;
mod transport;

pub use config::{BurstConfig, EngineConfig, RetryPolicy};
pub use connection::{ConnectionManager, ConnectionState};
pub use coordinator::{SyncCoordinator, SyncStats};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, EventKind, SubscriptionId, SyncEvent};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use queue::OfflineQueue;
pub use resolver::{ConflictResolution, ConflictResolver, PendingLocal, ResolverAction};
pub use retry::Retrier;
pub use store::{AcceptAll, EntityStore, MemoryStore, Validator};
pub use transport::{MockTransport, SyncTransport};
