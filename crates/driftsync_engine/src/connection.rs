//! Connection lifecycle management.

use crate::config::RetryPolicy;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::transport::SyncTransport;
use driftsync_protocol::PresenceInfo;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle states of the transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; nothing in flight.
    Disconnected,
    /// A manual connect is in flight.
    Connecting,
    /// The session is open.
    Connected,
    /// Automatic reconnection is in flight.
    Reconnecting,
    /// Shut down; no further transitions. Terminal.
    Closed,
}

/// Drives the transport session through its lifecycle.
///
/// Owns the reconnection loop: when a session drops, it retries `open`
/// under the reconnect policy's backoff, emitting a `Reconnecting` event
/// before each attempt. When the policy is exhausted it emits
/// `ReconnectionFailed` and stays disconnected until a manual [`connect`]
/// resets the cycle.
///
/// [`connect`]: ConnectionManager::connect
pub struct ConnectionManager {
    transport: Arc<dyn SyncTransport>,
    events: Arc<EventBus>,
    state: RwLock<ConnectionState>,
    reconnect_policy: RetryPolicy,
    // Serializes reconnection: a second trigger while one loop runs is a no-op.
    reconnecting: AtomicBool,
}

impl ConnectionManager {
    /// Creates a manager over the given transport.
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        events: Arc<EventBus>,
        reconnect_policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            events,
            state: RwLock::new(ConnectionState::Disconnected),
            reconnect_policy,
            reconnecting: AtomicBool::new(false),
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Returns true while the session is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.transport.is_connected()
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<dyn SyncTransport> {
        &self.transport
    }

    /// Opens the session.
    ///
    /// A manual connect also restarts the lifecycle after automatic
    /// reconnection gave up. Fails with [`SyncError::Closed`] once the
    /// manager is closed.
    pub fn connect(&self) -> SyncResult<()> {
        {
            let mut state = self.state.write();
            match *state {
                ConnectionState::Closed => return Err(SyncError::Closed),
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    return Err(SyncError::transport_retryable("connect already in flight"))
                }
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        match self.transport.open() {
            Ok(()) => {
                *self.state.write() = ConnectionState::Connected;
                info!("session connected");
                self.events.emit(&SyncEvent::Connected);
                Ok(())
            }
            Err(err) => {
                *self.state.write() = ConnectionState::Disconnected;
                warn!(%err, "connect failed");
                Err(err)
            }
        }
    }

    /// Handles an observed session drop.
    ///
    /// Emits `Disconnected`, then runs the automatic reconnection loop.
    /// Returns true if the session was restored.
    pub fn handle_disconnect(&self) -> bool {
        if self.state() == ConnectionState::Closed {
            return false;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            // Another caller already drives the loop.
            return false;
        }

        *self.state.write() = ConnectionState::Disconnected;
        self.events.emit(&SyncEvent::Disconnected);

        let restored = self.run_reconnect_loop();
        self.reconnecting.store(false, Ordering::SeqCst);
        restored
    }

    fn run_reconnect_loop(&self) -> bool {
        for attempt in 1..=self.reconnect_policy.max_attempts {
            if self.state() == ConnectionState::Closed {
                return false;
            }

            *self.state.write() = ConnectionState::Reconnecting;
            self.events.emit(&SyncEvent::Reconnecting { attempt });

            let delay = self.reconnect_policy.delay_for_attempt(attempt);
            debug!(attempt, ?delay, "scheduling reconnection attempt");
            std::thread::sleep(delay);

            match self.transport.open() {
                Ok(()) => {
                    *self.state.write() = ConnectionState::Connected;
                    info!(attempt, "session restored");
                    self.events.emit(&SyncEvent::Connected);
                    return true;
                }
                Err(err) => {
                    warn!(attempt, %err, "reconnection attempt failed");
                }
            }
        }

        *self.state.write() = ConnectionState::Disconnected;
        warn!("reconnection exhausted, awaiting manual connect");
        self.events.emit(&SyncEvent::ReconnectionFailed);
        false
    }

    /// Shuts the manager down. Terminal; subsequent connects fail.
    pub fn close(&self) -> SyncResult<()> {
        let mut state = self.state.write();
        if *state == ConnectionState::Closed {
            return Ok(());
        }
        *state = ConnectionState::Closed;
        drop(state);
        self.transport.close()
    }

    /// Sends a presence update.
    ///
    /// Presence is ephemeral: while disconnected it is dropped, never
    /// queued.
    pub fn update_presence(&self, info: &PresenceInfo) -> SyncResult<()> {
        if !self.is_connected() {
            debug!(user_id = %info.user_id, "dropping presence update while disconnected");
            return Ok(());
        }
        self.transport.send_presence(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::transport::MockTransport;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_base_delay(Duration::from_millis(1))
    }

    fn manager(transport: Arc<MockTransport>, attempts: u32) -> (ConnectionManager, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let manager = ConnectionManager::new(transport, Arc::clone(&events), fast_policy(attempts));
        (manager, events)
    }

    #[test]
    fn connect_opens_transport_and_emits() {
        let transport = Arc::new(MockTransport::new());
        let (manager, events) = manager(Arc::clone(&transport), 3);

        let connected = Arc::new(Mutex::new(0u32));
        let c = Arc::clone(&connected);
        events.subscribe(EventKind::Connected, move |_| *c.lock() += 1);

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.is_connected());
        assert_eq!(*connected.lock(), 1);

        // Connecting twice is a no-op.
        manager.connect().unwrap();
        assert_eq!(*connected.lock(), 1);
    }

    #[test]
    fn reconnect_loop_restores_session() {
        let transport = Arc::new(MockTransport::new());
        let (manager, events) = manager(Arc::clone(&transport), 5);
        manager.connect().unwrap();

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&attempts);
        events.subscribe(EventKind::Reconnecting, move |event| {
            if let SyncEvent::Reconnecting { attempt } = event {
                a.lock().push(*attempt);
            }
        });

        transport.set_connected(false);
        transport.fail_next_opens(2);

        assert!(manager.handle_disconnect());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(*attempts.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn exhausted_reconnect_requires_manual_connect() {
        let transport = Arc::new(MockTransport::new());
        let (manager, events) = manager(Arc::clone(&transport), 2);
        manager.connect().unwrap();

        let failed = Arc::new(Mutex::new(0u32));
        let f = Arc::clone(&failed);
        events.subscribe(EventKind::ReconnectionFailed, move |_| *f.lock() += 1);

        transport.set_connected(false);
        transport.fail_next_opens(10);

        assert!(!manager.handle_disconnect());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(*failed.lock(), 1);

        // Manual connect restarts the cycle once the server is reachable.
        transport.fail_next_opens(0);
        manager.connect().unwrap();
        assert!(manager.is_connected());
    }

    #[test]
    fn closed_manager_refuses_connect() {
        let transport = Arc::new(MockTransport::new());
        let (manager, _) = manager(Arc::clone(&transport), 3);
        manager.connect().unwrap();

        manager.close().unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!transport.is_connected());
        assert!(matches!(manager.connect(), Err(SyncError::Closed)));
        assert!(!manager.handle_disconnect());
    }

    #[test]
    fn presence_is_dropped_while_disconnected() {
        let transport = Arc::new(MockTransport::new());
        let (manager, _) = manager(Arc::clone(&transport), 3);

        let info = PresenceInfo {
            user_id: "u1".into(),
            status: "online".into(),
            updated_at: 100,
        };

        manager.update_presence(&info).unwrap();
        assert!(transport.sent_presence().is_empty());

        manager.connect().unwrap();
        manager.update_presence(&info).unwrap();
        assert_eq!(transport.sent_presence().len(), 1);
    }
}
