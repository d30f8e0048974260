//! Typed publish/subscribe events.
//!
//! Events form a closed set of variants with an explicit per-event
//! subscriber list; subscriptions are released by handle.

use crate::resolver::ConflictResolution;
use driftsync_protocol::{PresenceInfo, SyncChange};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// State transitions the engine notifies collaborators about.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The transport session opened.
    Connected,
    /// The transport session dropped.
    Disconnected,
    /// A reconnection attempt is about to be scheduled.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
    },
    /// Automatic reconnection gave up; a manual connect is required.
    ReconnectionFailed,
    /// An operation was appended to the offline queue.
    OperationQueued {
        /// Id of the queued operation.
        operation_id: u64,
    },
    /// The server accepted an operation.
    OperationConfirmed {
        /// Id of the confirmed operation.
        operation_id: u64,
        /// Server-assigned timestamp in milliseconds.
        server_timestamp: i64,
    },
    /// The server rejected an operation; its optimistic update was rolled back.
    OperationFailed {
        /// Id of the rejected operation.
        operation_id: u64,
        /// Rejection detail.
        error: String,
    },
    /// Concurrent edits to one entity were merged.
    ConflictResolved(ConflictResolution),
    /// A remote change should be applied by downstream consumers.
    RemoteChange(SyncChange),
    /// A state patch was applied.
    StatePatchApplied {
        /// Version token the client advanced to.
        state_version: String,
        /// Number of upserted entities.
        upserts: usize,
        /// Number of deleted entities.
        deletes: usize,
    },
    /// Another actor's presence changed.
    PresenceUpdate(PresenceInfo),
}

impl SyncEvent {
    /// Returns the discriminant used for subscription routing.
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::Connected => EventKind::Connected,
            SyncEvent::Disconnected => EventKind::Disconnected,
            SyncEvent::Reconnecting { .. } => EventKind::Reconnecting,
            SyncEvent::ReconnectionFailed => EventKind::ReconnectionFailed,
            SyncEvent::OperationQueued { .. } => EventKind::OperationQueued,
            SyncEvent::OperationConfirmed { .. } => EventKind::OperationConfirmed,
            SyncEvent::OperationFailed { .. } => EventKind::OperationFailed,
            SyncEvent::ConflictResolved(_) => EventKind::ConflictResolved,
            SyncEvent::RemoteChange(_) => EventKind::RemoteChange,
            SyncEvent::StatePatchApplied { .. } => EventKind::StatePatchApplied,
            SyncEvent::PresenceUpdate(_) => EventKind::PresenceUpdate,
        }
    }
}

/// Discriminant of [`SyncEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    ReconnectionFailed,
    OperationQueued,
    OperationConfirmed,
    OperationFailed,
    ConflictResolved,
    RemoteChange,
    StatePatchApplied,
    PresenceUpdate,
}

/// Handle for releasing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// Typed publish/subscribe bus.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event kind.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Removes a subscription by handle.
    ///
    /// Returns true if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for handlers in subscribers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(handle, _)| *handle != id);
            if handlers.len() != before {
                return true;
            }
        }
        false
    }

    /// Delivers an event to every subscriber of its kind.
    pub fn emit(&self, event: &SyncEvent) {
        let subscribers = self.subscribers.read();
        if let Some(handlers) = subscribers.get(&event.kind()) {
            for (_, handler) in handlers {
                handler(event);
            }
        }
    }

    /// Returns the number of subscribers for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .get(&kind)
            .map(|h| h.len())
            .unwrap_or(0)
    }
}
