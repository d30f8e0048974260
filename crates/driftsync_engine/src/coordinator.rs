//! Orchestration of queueing, submission, reconciliation and conflicts.

use crate::config::EngineConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::queue::OfflineQueue;
use crate::resolver::{ConflictResolver, PendingLocal, ResolverAction};
use crate::retry::Retrier;
use crate::store::{EntityStore, Validator};
use crate::transport::SyncTransport;
use driftsync_protocol::{
    now_millis, ChangeType, Confirmation, Entity, EntityIntent, LiveMessage, Operation,
    OperationsRequest, PresenceInfo, PushMessage, StateRequest, SyncChange,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Snapshot of engine-internal counters.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Operations waiting in the offline queue.
    pub queued: usize,
    /// Operations buffered for the next batch flush.
    pub batched: usize,
    /// Operations submitted and awaiting confirmation.
    pub pending: usize,
    /// Entities with unconfirmed optimistic edits.
    pub optimistic: usize,
    /// Operations the server has confirmed.
    pub confirmed: u64,
    /// Operations the server has rejected.
    pub failed: u64,
    /// Conflicts merged since startup.
    pub conflicts_resolved: u64,
    /// Last state version the client reconciled to.
    pub state_version: Option<String>,
}

/// Per-entity rollback record for optimistic updates.
///
/// One record exists per entity with unconfirmed local edits. `original`
/// keeps the entity value before the *first* of them, so rolling back after
/// a rejection undoes the whole unconfirmed stack.
struct OptimisticRecord {
    original: Option<Entity>,
    operation_ids: Vec<u64>,
    last_operation: Operation,
}

struct Inner {
    queue: OfflineQueue,
    batch: Vec<Operation>,
    flush_deadline: Option<Instant>,
    pending: HashMap<u64, Operation>,
    optimistic: HashMap<String, OptimisticRecord>,
    resolver: ConflictResolver,
    state_version: Option<String>,
    last_sync_timestamp: Option<i64>,
    confirmed: u64,
    failed: u64,
    conflicts_resolved: u64,
}

/// The sync engine's central coordinator.
///
/// User intent enters through [`execute_operation`]: the operation is
/// validated, applied optimistically to the local store, and either queued
/// (offline) or batched (online). Batches flush when full or when the
/// debounce window elapses. Confirmations commit or roll back the
/// optimistic updates; remote changes are reconciled through the
/// [`ConflictResolver`] before they reach the store.
///
/// All entry points are synchronous and may be called from multiple
/// threads; internal state is guarded by a single mutex which is never held
/// across a network call or an event callback.
///
/// [`execute_operation`]: SyncCoordinator::execute_operation
pub struct SyncCoordinator {
    config: EngineConfig,
    connection: Arc<ConnectionManager>,
    events: Arc<EventBus>,
    store: Arc<dyn EntityStore>,
    validator: Arc<dyn Validator>,
    inner: Mutex<Inner>,
    next_operation_id: AtomicU64,
}

impl SyncCoordinator {
    /// Creates a coordinator over the given transport and collaborators.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn SyncTransport>,
        store: Arc<dyn EntityStore>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let connection = Arc::new(ConnectionManager::new(
            transport,
            Arc::clone(&events),
            config.reconnect.clone(),
        ));

        let inner = Inner {
            queue: OfflineQueue::new(config.queue_capacity),
            batch: Vec::new(),
            flush_deadline: None,
            pending: HashMap::new(),
            optimistic: HashMap::new(),
            resolver: ConflictResolver::new(config.burst.clone()),
            state_version: None,
            last_sync_timestamp: None,
            confirmed: 0,
            failed: 0,
            conflicts_resolved: 0,
        };

        Self {
            config,
            connection,
            events,
            store,
            validator,
            inner: Mutex::new(inner),
            next_operation_id: AtomicU64::new(0),
        }
    }

    /// Returns the event bus for subscriptions.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Returns the connection manager.
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Opens the session, reconciles state and flushes the offline queue.
    pub fn connect(&self) -> SyncResult<()> {
        self.connection.connect()?;
        self.sync_state()?;
        self.flush_queued(true)
    }

    /// Shuts the engine down.
    ///
    /// Unconfirmed operations (batched or submitted) are moved back into
    /// the offline queue so a later engine instance can resume from
    /// persisted state. Terminal.
    pub fn close(&self) -> SyncResult<()> {
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let mut unconfirmed: Vec<Operation> = inner
                .pending
                .drain()
                .map(|(_, op)| op)
                .chain(inner.batch.drain(..))
                .collect();
            unconfirmed.sort_by_key(|op| op.id);
            inner.flush_deadline = None;
            if !unconfirmed.is_empty() {
                info!(count = unconfirmed.len(), "requeueing unconfirmed operations on close");
                for dropped in inner.queue.reinstate(unconfirmed) {
                    self.discard_evicted(inner, &dropped);
                }
            }
        }
        self.connection.close()
    }

    /// Validates, optimistically applies and schedules one operation.
    ///
    /// Returns the assigned operation id. Offline queueing is success;
    /// only validation failures and use after [`close`] are errors.
    ///
    /// [`close`]: SyncCoordinator::close
    pub fn execute_operation(&self, name: &str, args: Vec<Value>) -> SyncResult<u64> {
        if self.state() == ConnectionState::Closed {
            return Err(SyncError::Closed);
        }

        let id = self.next_operation_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut operation = Operation::new(
            id,
            name,
            args,
            self.config.client_id.clone(),
            now_millis(),
        );
        self.validate(&mut operation)?;

        let mut events = Vec::new();
        let flush_now;
        {
            let mut inner = self.inner.lock();
            self.apply_optimistic(&mut inner, &operation);

            if self.connection.is_connected() {
                inner.batch.push(operation);
                if inner.batch.len() >= self.config.batch_size {
                    inner.flush_deadline = None;
                    flush_now = true;
                } else {
                    inner.flush_deadline = Some(Instant::now() + self.config.flush_debounce);
                    flush_now = false;
                }
            } else {
                if let Some(evicted) = inner.queue.enqueue(operation) {
                    self.discard_evicted(&mut inner, &evicted);
                }
                events.push(SyncEvent::OperationQueued { operation_id: id });
                flush_now = false;
            }
        }

        for event in &events {
            self.events.emit(event);
        }
        if flush_now {
            self.flush()?;
        }
        Ok(id)
    }

    /// Creates or replaces an entity. Convenience over [`execute_operation`].
    ///
    /// [`execute_operation`]: SyncCoordinator::execute_operation
    pub fn upsert_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        value: Value,
    ) -> SyncResult<u64> {
        self.execute_operation(
            &format!("upsert{entity_type}"),
            vec![Value::String(entity_id.to_string()), value],
        )
    }

    /// Deletes an entity. Convenience over [`execute_operation`].
    ///
    /// [`execute_operation`]: SyncCoordinator::execute_operation
    pub fn delete_entity(&self, entity_type: &str, entity_id: &str) -> SyncResult<u64> {
        self.execute_operation(
            &format!("delete{entity_type}"),
            vec![Value::String(entity_id.to_string())],
        )
    }

    /// Accepts a local change in the direct-change shape.
    ///
    /// Compatibility ingress for callers predating named operations: the
    /// change is translated into an `upsert<Type>`/`delete<Type>` operation
    /// so both calling conventions share one pipeline.
    pub fn send_change(&self, change: SyncChange) -> SyncResult<u64> {
        match change.change_type {
            ChangeType::Upsert => {
                let value = change
                    .entity
                    .map(|e| Value::Object(e.data))
                    .unwrap_or(Value::Null);
                self.execute_operation(
                    &format!("upsert{}", change.entity_type),
                    vec![Value::String(change.entity_id), value],
                )
            }
            ChangeType::Delete => self.execute_operation(
                &format!("delete{}", change.entity_type),
                vec![Value::String(change.entity_id)],
            ),
        }
    }

    /// Submits the current batch immediately, debounce notwithstanding.
    pub fn flush(&self) -> SyncResult<()> {
        let batch = {
            let mut inner = self.inner.lock();
            inner.flush_deadline = None;
            let batch = std::mem::take(&mut inner.batch);
            for op in &batch {
                inner.pending.insert(op.id, op.clone());
            }
            batch
        };

        if batch.is_empty() {
            return Ok(());
        }
        self.submit(batch, true)
    }

    /// Submits the batch if the debounce window has elapsed.
    ///
    /// Hosts call this from their tick/idle loop; [`flush`] remains
    /// available for explicit synchronization points.
    ///
    /// [`flush`]: SyncCoordinator::flush
    pub fn flush_if_due(&self) -> SyncResult<()> {
        let due = {
            let inner = self.inner.lock();
            matches!(inner.flush_deadline, Some(deadline) if deadline <= Instant::now())
        };
        if due {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Pulls and applies a state patch from the server.
    ///
    /// The request carries the last-known version token; the response is an
    /// absolute description of what changed since, so applying it twice is
    /// harmless. Advances the version token on success.
    pub fn sync_state(&self) -> SyncResult<()> {
        let request = {
            let inner = self.inner.lock();
            StateRequest::new(inner.state_version.clone(), inner.last_sync_timestamp)
        };

        let transport = Arc::clone(self.connection.transport());
        let patch = Retrier::new(self.config.push_retry.clone())
            .run(|| transport.pull_state(&request))?;

        let upserts = patch.entities.len();
        let deletes = patch.deleted_entity_ids.len();
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            for entity in patch.entities {
                let change = SyncChange::upsert(entity, "server", 0);
                self.route_change(&mut inner, change, &mut events);
            }
            for entity_id in patch.deleted_entity_ids {
                // The patch carries only the id; the store still has the
                // doomed entry, so recover the type from it.
                let entity_type = self
                    .store
                    .get_by_id(&entity_id)
                    .map(|e| e.entity_type)
                    .unwrap_or_default();
                let change =
                    SyncChange::delete(entity_type, entity_id, patch.sync_timestamp, "server", 0);
                self.route_change(&mut inner, change, &mut events);
            }
            inner.state_version = Some(patch.state_version.clone());
            inner.last_sync_timestamp = Some(patch.sync_timestamp);
        }

        debug!(version = %patch.state_version, upserts, deletes, "state patch applied");
        events.push(SyncEvent::StatePatchApplied {
            state_version: patch.state_version,
            upserts,
            deletes,
        });
        for event in &events {
            self.events.emit(event);
        }
        Ok(())
    }

    /// Handles one remote entity change.
    pub fn handle_remote_change(&self, change: SyncChange) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            self.route_change(&mut inner, change, &mut events);
        }
        for event in &events {
            self.events.emit(event);
        }
    }

    /// Handles one out-of-band push notification.
    pub fn handle_push_message(&self, message: PushMessage) -> SyncResult<()> {
        match message {
            PushMessage::StateChanged => self.sync_state(),
            PushMessage::OperationConfirmed { payload } => {
                self.handle_confirmation(payload);
                Ok(())
            }
        }
    }

    /// Handles one message from the live duplex channel.
    pub fn handle_live_message(&self, message: LiveMessage) {
        match message {
            LiveMessage::SyncChange { data } => self.handle_remote_change(data),
            LiveMessage::PresenceUpdate { data } => {
                self.events.emit(&SyncEvent::PresenceUpdate(data));
            }
        }
    }

    /// Handles one server confirmation, committing or rolling back.
    pub fn handle_confirmation(&self, confirmation: Confirmation) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            self.apply_confirmation(&mut inner, confirmation, &mut events);
        }
        for event in &events {
            self.events.emit(event);
        }
    }

    /// Sends a presence update for this client. Best-effort.
    pub fn update_presence(&self, status: &str) -> SyncResult<()> {
        self.connection.update_presence(&PresenceInfo {
            user_id: self.config.client_id.clone(),
            status: status.to_string(),
            updated_at: now_millis(),
        })
    }

    /// Returns the number of operations in the offline queue.
    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Returns a snapshot of the engine counters.
    pub fn stats(&self) -> SyncStats {
        let inner = self.inner.lock();
        SyncStats {
            queued: inner.queue.len(),
            batched: inner.batch.len(),
            pending: inner.pending.len(),
            optimistic: inner.optimistic.len(),
            confirmed: inner.confirmed,
            failed: inner.failed,
            conflicts_resolved: inner.conflicts_resolved,
            state_version: inner.state_version.clone(),
        }
    }

    fn validate(&self, operation: &mut Operation) -> SyncResult<()> {
        let Some(EntityIntent::Upsert { value, .. }) = operation.entity_intent() else {
            return Ok(());
        };
        match self.validator.validate(&value) {
            Ok(normalized) => {
                operation.args[1] = normalized;
                Ok(())
            }
            Err(issues) => Err(SyncError::validation(issues)),
        }
    }

    /// Applies an operation's entity effect to the store, recording the
    /// pre-image for rollback. Opaque operations have no local effect.
    fn apply_optimistic(&self, inner: &mut Inner, operation: &Operation) {
        let Some(intent) = operation.entity_intent() else {
            return;
        };
        let entity_id = intent.entity_id().to_string();

        let original = self.store.get_by_id(&entity_id);
        match inner.optimistic.entry(entity_id.clone()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.operation_ids.push(operation.id);
                record.last_operation = operation.clone();
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(OptimisticRecord {
                    original,
                    operation_ids: vec![operation.id],
                    last_operation: operation.clone(),
                });
            }
        }

        match intent {
            EntityIntent::Upsert {
                entity_type, value, ..
            } => {
                let entity =
                    Entity::from_value(entity_id, entity_type, value, operation.timestamp);
                self.store.apply_upsert(entity);
            }
            EntityIntent::Delete { .. } => {
                self.store.apply_delete(&entity_id);
            }
        }
    }

    /// Drops tracking for an operation evicted from a full queue. Its
    /// optimistic effect stays visible until the next state pull.
    fn discard_evicted(&self, inner: &mut Inner, evicted: &Operation) {
        let Some(intent) = evicted.entity_intent() else {
            return;
        };
        let entity_id = intent.entity_id();
        if let Some(record) = inner.optimistic.get_mut(entity_id) {
            record.operation_ids.retain(|id| *id != evicted.id);
            if record.operation_ids.is_empty() {
                inner.optimistic.remove(entity_id);
            }
        }
    }

    fn submit(&self, batch: Vec<Operation>, reconnect_on_failure: bool) -> SyncResult<()> {
        let ids: Vec<u64> = batch.iter().map(|op| op.id).collect();
        let request = OperationsRequest::new(batch);

        let transport = Arc::clone(self.connection.transport());
        let retrier = Retrier::new(self.config.push_retry.clone());
        match retrier.run(|| transport.push_operations(&request)) {
            Ok(response) => {
                let mut events = Vec::new();
                {
                    let mut inner = self.inner.lock();
                    for confirmation in response.confirmations {
                        self.apply_confirmation(&mut inner, confirmation, &mut events);
                    }
                }
                for event in &events {
                    self.events.emit(event);
                }
                Ok(())
            }
            Err(err) => {
                warn!(%err, count = ids.len(), "batch submission failed, requeueing");
                {
                    let mut inner = self.inner.lock();
                    let mut requeued: Vec<Operation> = ids
                        .iter()
                        .filter_map(|id| inner.pending.remove(id))
                        .collect();
                    requeued.sort_by_key(|op| op.id);
                    for dropped in inner.queue.reinstate(requeued) {
                        self.discard_evicted(&mut inner, &dropped);
                    }
                }

                if reconnect_on_failure && self.connection.handle_disconnect() {
                    // Session restored: reconcile, then retry what we
                    // requeued. A repeat failure stays queued.
                    if let Err(err) = self.sync_state() {
                        warn!(%err, "state sync after reconnect failed");
                    }
                    self.flush_queued(false)?;
                }
                Ok(())
            }
        }
    }

    /// Drains the offline queue into batches and submits them in order.
    fn flush_queued(&self, reconnect_on_failure: bool) -> SyncResult<()> {
        loop {
            let batch = {
                let mut inner = self.inner.lock();
                let batch = inner.queue.drain(self.config.batch_size);
                for op in &batch {
                    inner.pending.insert(op.id, op.clone());
                }
                batch
            };
            if batch.is_empty() {
                return Ok(());
            }
            self.submit(batch, reconnect_on_failure)?;
            if !self.connection.is_connected() {
                return Ok(());
            }
        }
    }

    fn apply_confirmation(
        &self,
        inner: &mut Inner,
        confirmation: Confirmation,
        events: &mut Vec<SyncEvent>,
    ) {
        let operation = inner.pending.remove(&confirmation.operation_id);
        let Some(operation) = operation else {
            debug!(
                operation_id = confirmation.operation_id,
                "confirmation for unknown operation"
            );
            return;
        };

        if confirmation.success {
            self.commit_optimistic(inner, &operation);
            inner.confirmed += 1;
            events.push(SyncEvent::OperationConfirmed {
                operation_id: confirmation.operation_id,
                server_timestamp: confirmation.server_timestamp,
            });
        } else {
            let error = confirmation
                .error
                .unwrap_or_else(|| "operation rejected".to_string());
            warn!(operation_id = operation.id, %error, "operation rejected, rolling back");
            self.rollback_optimistic(inner, &operation);
            inner.failed += 1;
            events.push(SyncEvent::OperationFailed {
                operation_id: confirmation.operation_id,
                error,
            });
        }
    }

    fn commit_optimistic(&self, inner: &mut Inner, operation: &Operation) {
        let Some(intent) = operation.entity_intent() else {
            return;
        };
        let entity_id = intent.entity_id();
        if let Some(record) = inner.optimistic.get_mut(entity_id) {
            record.operation_ids.retain(|id| *id != operation.id);
            if record.operation_ids.is_empty() {
                inner.optimistic.remove(entity_id);
            }
        }
    }

    /// Restores the entity to its value before the first unconfirmed local
    /// edit and drops the whole record.
    fn rollback_optimistic(&self, inner: &mut Inner, operation: &Operation) {
        let Some(intent) = operation.entity_intent() else {
            return;
        };
        let entity_id = intent.entity_id();
        let Some(record) = inner.optimistic.remove(entity_id) else {
            return;
        };
        match record.original {
            Some(original) => self.store.apply_upsert(original),
            None => self.store.apply_delete(entity_id),
        }
    }

    /// Routes one remote change through the resolver and applies the
    /// resulting actions. Events are collected, not emitted, so the caller
    /// can drop the lock first.
    fn route_change(&self, inner: &mut Inner, change: SyncChange, events: &mut Vec<SyncEvent>) {
        let pending = inner.optimistic.get(&change.entity_id).and_then(|record| {
            let entity = self.store.get_by_id(&change.entity_id)?;
            Some(PendingLocal {
                operation: record.last_operation.clone(),
                entity,
            })
        });

        let actions = inner.resolver.ingest(change, pending.as_ref(), now_millis());
        for action in actions {
            match action {
                ResolverAction::Forward(change) => {
                    match &change.entity {
                        Some(entity) => self.store.apply_upsert(entity.clone()),
                        None => self.store.apply_delete(&change.entity_id),
                    }
                    events.push(SyncEvent::RemoteChange(change));
                }
                ResolverAction::Resolved(resolution) => {
                    self.store.apply_upsert(resolution.merged_entity.clone());
                    inner.conflicts_resolved += 1;
                    events.push(SyncEvent::ConflictResolved(resolution));
                }
                ResolverAction::ApplyMerged(entity) => {
                    debug!(entity_id = %entity.id, "applying burst fold result");
                    self.store.apply_upsert(entity);
                }
                ResolverAction::Replay(change) => {
                    events.push(SyncEvent::RemoteChange(change));
                }
            }
        }
    }
}
