//! Transport layer abstraction.

use crate::error::{SyncError, SyncResult};
use driftsync_protocol::{
    Confirmation, OperationsRequest, OperationsResponse, PresenceInfo, StatePatch, StateRequest,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A sync transport handles communication with the remote authority.
///
/// This trait abstracts the network layer: one implementation may realize
/// the wire contract over HTTP plus a push channel, another over a single
/// duplex socket, and tests use a mock.
pub trait SyncTransport: Send + Sync {
    /// Opens the transport session.
    fn open(&self) -> SyncResult<()>;

    /// Closes the transport session.
    fn close(&self) -> SyncResult<()>;

    /// Returns true while the session is usable.
    fn is_connected(&self) -> bool;

    /// Submits a batch of operations.
    fn push_operations(&self, request: &OperationsRequest) -> SyncResult<OperationsResponse>;

    /// Pulls a state snapshot or delta patch.
    fn pull_state(&self, request: &StateRequest) -> SyncResult<StatePatch>;

    /// Sends best-effort presence. Never queued.
    fn send_presence(&self, info: &PresenceInfo) -> SyncResult<()>;
}

/// A scriptable transport for testing.
///
/// By default every submitted operation is confirmed successfully and state
/// pulls return an empty patch; tests inject failures, rejections and
/// patches as needed.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    fail_opens: AtomicU32,
    fail_pushes: AtomicU32,
    fail_pulls: AtomicU32,
    rejections: Mutex<HashMap<u64, String>>,
    state_patches: Mutex<VecDeque<StatePatch>>,
    pushed: Mutex<Vec<OperationsRequest>>,
    state_requests: Mutex<Vec<StateRequest>>,
    presence: Mutex<Vec<PresenceInfo>>,
}

impl MockTransport {
    /// Creates a disconnected mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the connected flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next `n` `open` calls fail with a retryable error.
    pub fn fail_next_opens(&self, n: u32) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` `push_operations` calls fail with a retryable error.
    pub fn fail_next_pushes(&self, n: u32) {
        self.fail_pushes.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` `pull_state` calls fail with a retryable error.
    pub fn fail_next_pulls(&self, n: u32) {
        self.fail_pulls.store(n, Ordering::SeqCst);
    }

    /// Marks an operation id for server-side rejection.
    pub fn reject_operation(&self, operation_id: u64, error: impl Into<String>) {
        self.rejections.lock().insert(operation_id, error.into());
    }

    /// Queues a patch to return from the next `pull_state` call.
    pub fn queue_state_patch(&self, patch: StatePatch) {
        self.state_patches.lock().push_back(patch);
    }

    /// Returns every submitted batch, in submission order.
    pub fn pushed_batches(&self) -> Vec<OperationsRequest> {
        self.pushed.lock().clone()
    }

    /// Returns every state request received.
    pub fn state_requests(&self) -> Vec<StateRequest> {
        self.state_requests.lock().clone()
    }

    /// Returns every presence message sent.
    pub fn sent_presence(&self) -> Vec<PresenceInfo> {
        self.presence.lock().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl SyncTransport for MockTransport {
    fn open(&self) -> SyncResult<()> {
        if Self::take_failure(&self.fail_opens) {
            return Err(SyncError::transport_retryable("connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn push_operations(&self, request: &OperationsRequest) -> SyncResult<OperationsResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if Self::take_failure(&self.fail_pushes) {
            return Err(SyncError::transport_retryable("connection reset during push"));
        }

        self.pushed.lock().push(request.clone());

        let rejections = self.rejections.lock();
        let confirmations = request
            .operations
            .iter()
            .map(|op| match rejections.get(&op.id) {
                Some(error) => Confirmation::rejected(op.id, &op.client_id, op.timestamp + 1, error),
                None => Confirmation::success(op.id, &op.client_id, op.timestamp + 1),
            })
            .collect();

        Ok(OperationsResponse::new(confirmations))
    }

    fn pull_state(&self, request: &StateRequest) -> SyncResult<StatePatch> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if Self::take_failure(&self.fail_pulls) {
            return Err(SyncError::transport_retryable("connection reset during pull"));
        }

        self.state_requests.lock().push(request.clone());

        Ok(self
            .state_patches
            .lock()
            .pop_front()
            .unwrap_or_else(|| StatePatch::new("v1", vec![], vec![], 0)))
    }

    fn send_presence(&self, info: &PresenceInfo) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.presence.lock().push(info.clone());
        Ok(())
    }
}
