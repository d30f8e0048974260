//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so hosts can plug in
//! whichever library they already use (reqwest, ureq, hyper) or route
//! requests in-process for testing.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use driftsync_protocol::{
    OperationsRequest, OperationsResponse, PresenceInfo, StatePatch, StateRequest,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP layer. Request and
/// response bodies are JSON.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
///
/// Maps the transport operations onto three endpoints under the base URL:
/// `/sync/operations`, `/sync/state` and `/sync/presence`. Any request
/// failure marks the transport disconnected; the connection manager decides
/// when to reopen it.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    request_timeout: Duration,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            request_timeout,
            connected: AtomicBool::new(false),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    fn post_json<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, endpoint);
        let response_body = self
            .client
            .post(&url, body, self.request_timeout)
            .map_err(|e| {
                self.set_error(&e);
                self.connected.store(false, Ordering::SeqCst);
                SyncError::transport_retryable(e)
            })?;

        self.clear_error();

        serde_json::from_slice(&response_body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn open(&self) -> SyncResult<()> {
        if !self.client.is_healthy() {
            return Err(SyncError::transport_retryable("http client unavailable"));
        }
        self.connected.store(true, Ordering::SeqCst);
        self.clear_error();
        Ok(())
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn push_operations(&self, request: &OperationsRequest) -> SyncResult<OperationsResponse> {
        self.post_json("/sync/operations", request)
    }

    fn pull_state(&self, request: &StateRequest) -> SyncResult<StatePatch> {
        self.post_json("/sync/state", request)
    }

    fn send_presence(&self, info: &PresenceInfo) -> SyncResult<()> {
        let _: serde_json::Value = self.post_json("/sync/presence", info)?;
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

impl<S: LoopbackServer> LoopbackServer for std::sync::Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.as_ref().handle_post(path, body)
    }
}

/// A loopback HTTP client that routes requests directly to a server value.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_protocol::Confirmation;

    struct TestClient {
        response: RwLock<Option<Vec<u8>>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                healthy: AtomicBool::new(true),
            }
        }

        fn set_response(&self, resp: Vec<u8>) {
            *self.response.write() = Some(resp);
        }
    }

    impl HttpClient for TestClient {
        fn post(&self, _url: &str, _body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, String> {
            self.response
                .read()
                .clone()
                .ok_or_else(|| "no response set".into())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn transport(client: TestClient) -> HttpTransport<TestClient> {
        HttpTransport::new(
            "https://sync.example.com",
            client,
            Duration::from_secs(30),
        )
    }

    #[test]
    fn starts_disconnected_until_opened() {
        let transport = transport(TestClient::new());
        assert!(!transport.is_connected());
        transport.open().unwrap();
        assert!(transport.is_connected());
        transport.close().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn refuses_requests_while_closed() {
        let transport = transport(TestClient::new());
        let result = transport.pull_state(&StateRequest::default());
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn unhealthy_client_blocks_open() {
        let client = TestClient::new();
        client.healthy.store(false, Ordering::SeqCst);
        let transport = transport(client);
        assert!(transport.open().is_err());
    }

    #[test]
    fn push_decodes_confirmations() {
        let client = TestClient::new();
        let response = OperationsResponse::new(vec![Confirmation::success(1, "c1", 100)]);
        client.set_response(serde_json::to_vec(&response).unwrap());

        let transport = transport(client);
        transport.open().unwrap();

        let result = transport
            .push_operations(&OperationsRequest::new(vec![]))
            .unwrap();
        assert_eq!(result.confirmations.len(), 1);
        assert!(result.confirmations[0].success);
        assert!(transport.last_error().is_none());
    }

    #[test]
    fn request_failure_disconnects_and_records_error() {
        let transport = transport(TestClient::new());
        transport.open().unwrap();

        let result = transport.pull_state(&StateRequest::default());
        assert!(matches!(result, Err(SyncError::Transport { .. })));
        assert!(!transport.is_connected());
        assert_eq!(transport.last_error().as_deref(), Some("no response set"));
    }

    #[test]
    fn loopback_routes_by_path() {
        struct EchoServer;
        impl LoopbackServer for EchoServer {
            fn handle_post(&self, path: &str, _body: &[u8]) -> Result<Vec<u8>, String> {
                if path == "/sync/state" {
                    let patch = StatePatch::new("v1", vec![], vec![], 0);
                    Ok(serde_json::to_vec(&patch).unwrap())
                } else {
                    Err(format!("unknown path: {path}"))
                }
            }
        }

        // Servers are typically shared handles; Arc must satisfy the bound.
        let transport = HttpTransport::new(
            "https://sync.example.com",
            LoopbackClient::new(std::sync::Arc::new(EchoServer)),
            Duration::from_secs(30),
        );
        transport.open().unwrap();

        let patch = transport.pull_state(&StateRequest::default()).unwrap();
        assert_eq!(patch.state_version, "v1");
        assert!(transport.push_operations(&OperationsRequest::new(vec![])).is_err());
    }
}
