use std::sync::Arc;

use reqwest::Method;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::push::{self, PushWriter};
use super::request::{ApiRequest, ApiResponse, HttpTransport, RequestTransport};
use super::state::{Protocol, TransportState};
use crate::config::ControllerConfig;
use crate::error::TransportError;
use crate::protocol::{
    CheckResult, PushMessage, Registration, RegistrationAck, SubmissionReceipt, Target,
};
use crate::{CHECKS_ENDPOINT, REGISTER_ENDPOINT, TARGETS_ENDPOINT};

/// Path a check result took to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRoute {
    /// Written to the push channel
    Push,
    /// Posted over the request/response path; `accepted` reflects the
    /// controller's receipt
    Request { accepted: bool },
}

/// What the monitoring side needs from the controller
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    /// Fetch the current target list
    async fn fetch_targets(&self) -> Result<Vec<Target>, TransportError>;

    /// Submit one check result, push channel first
    async fn submit_result(&self, result: &CheckResult) -> Result<SubmitRoute, TransportError>;

    /// Whether the push channel is currently live
    async fn is_push_connected(&self) -> bool;

    /// Re-attempt the push channel if it is enabled and down. Failures are
    /// logged, never returned.
    async fn reconnect_push(&self, cancel: &CancellationToken);
}

/// Client for the controller's agent API
pub struct ControllerClient {
    config: ControllerConfig,
    fast: Arc<dyn RequestTransport>,
    simple: Arc<dyn RequestTransport>,
    state: Arc<RwLock<TransportState>>,
    updates_tx: mpsc::Sender<Vec<Target>>,
    updates_rx: Mutex<Option<mpsc::Receiver<Vec<Target>>>>,
    /// Serializes push connect attempts
    connect_lock: Mutex<()>,
}

impl ControllerClient {
    /// Create a client speaking HTTP/2 with HTTP/1.1 fallback
    pub fn new(config: ControllerConfig) -> Result<Self, TransportError> {
        let fast = Arc::new(HttpTransport::multiplexed(&config)?);
        let simple = Arc::new(HttpTransport::simple(&config)?);
        Ok(Self::with_transports(config, fast, simple))
    }

    /// Create a client over explicit fast and simple transports
    pub fn with_transports(
        config: ControllerConfig,
        fast: Arc<dyn RequestTransport>,
        simple: Arc<dyn RequestTransport>,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(config.update_queue_capacity.max(1));
        Self {
            config,
            fast,
            simple,
            state: Arc::new(RwLock::new(TransportState::default())),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
            connect_lock: Mutex::new(()),
        }
    }

    /// Register, fetch the initial target list, then try the push channel.
    ///
    /// Registration and the fetch must succeed; a push failure only leaves
    /// the client unconnected.
    pub async fn establish(&self, cancel: &CancellationToken) -> Result<Vec<Target>, TransportError> {
        self.register().await?;
        let targets = self.fetch_targets().await?;

        info!(
            protocol = %self.request_protocol().await,
            targets = targets.len(),
            "Request path established"
        );

        if self.config.use_websocket {
            if let Err(e) = self.connect_push(cancel).await {
                warn!("Push connection failed, will use polling: {}", e);
            }
        } else {
            info!("Push channel disabled, using polling only");
        }

        Ok(targets)
    }

    /// Announce this agent to the controller
    pub async fn register(&self) -> Result<RegistrationAck, TransportError> {
        let registration = Registration::new(&self.config.agent_id, &self.config.hostname);
        let body = serde_json::to_vec(&registration)?;

        let response = self.call(Method::POST, REGISTER_ENDPOINT, Some(body)).await?;
        let ack: RegistrationAck = response.json()?;

        info!(agent_id = %self.config.agent_id, message = %ack.message, "Agent registered");
        Ok(ack)
    }

    /// Fetch the target list over the request/response path
    pub async fn fetch_targets(&self) -> Result<Vec<Target>, TransportError> {
        let response = self.call(Method::GET, TARGETS_ENDPOINT, None).await?;
        response.json()
    }

    /// Submit a check result: one write on the push channel if it is up,
    /// otherwise (or if that write fails) a request/response call
    pub async fn submit_result(&self, result: &CheckResult) -> Result<SubmitRoute, TransportError> {
        let writer = self.state.read().await.writer();
        if let Some(writer) = writer {
            match writer.send(&PushMessage::CheckResult(result.clone())).await {
                Ok(()) => {
                    debug!(target_id = result.target_id, "Check result sent via push channel");
                    return Ok(SubmitRoute::Push);
                }
                Err(e) => {
                    warn!(target_id = result.target_id, "Push submit failed, falling back: {}", e)
                }
            }
        }

        let body = serde_json::to_vec(std::slice::from_ref(result))?;
        let response = self.call(Method::POST, CHECKS_ENDPOINT, Some(body)).await?;

        let accepted = match response.json::<SubmissionReceipt>() {
            Ok(receipt) if !receipt.accepted() => {
                warn!(
                    target_id = result.target_id,
                    errors = ?receipt.errors,
                    "Controller rejected check result"
                );
                false
            }
            Ok(_) => true,
            Err(e) => {
                debug!("Unrecognised submission receipt: {}", e);
                true
            }
        };

        Ok(SubmitRoute::Request { accepted })
    }

    /// Open the push channel and start its receive loop under `cancel`.
    ///
    /// Concurrent attempts are serialized; an attempt that finds the channel
    /// already up returns immediately.
    pub async fn connect_push(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        if !self.config.use_websocket {
            return Err(TransportError::PushDisabled);
        }

        let _guard = self.connect_lock.lock().await;
        if self.is_push_connected().await {
            return Ok(());
        }

        let url = self.config.push_url()?;
        info!(host = url.host_str().unwrap_or_default(), path = url.path(), "Attempting push connection");

        let (writer, reader) = push::dial(&self.config).await?;
        let generation = self.state.write().await.attach(Arc::new(writer));
        info!("Push channel connected");

        tokio::spawn(push::receive_loop(
            reader,
            Arc::clone(&self.state),
            self.updates_tx.clone(),
            cancel.child_token(),
            generation,
        ));

        Ok(())
    }

    /// Hand out the queue of pushed target lists. Only the first caller gets it.
    pub async fn take_updates(&self) -> Option<mpsc::Receiver<Vec<Target>>> {
        self.updates_rx.lock().await.take()
    }

    pub async fn is_push_connected(&self) -> bool {
        self.state.read().await.is_connected()
    }

    /// Protocol currently carrying traffic
    pub async fn current_protocol(&self) -> Protocol {
        self.state.read().await.current_protocol()
    }

    /// Sticky protocol of the request/response path
    pub async fn request_protocol(&self) -> Protocol {
        self.state.read().await.request_protocol()
    }

    /// Release the push channel. Safe to call more than once.
    pub async fn close(&self) {
        let writer = self.state.write().await.detach();
        if let Some(writer) = writer {
            writer.close().await;
            info!("Push channel closed");
        }
    }

    /// Issue a request on the sticky protocol, falling back to the other one
    /// when the exchange itself fails
    async fn call(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Vec<u8>>,
    ) -> Result<ApiResponse, TransportError> {
        let request = ApiRequest {
            method,
            endpoint: endpoint.to_string(),
            url: self.config.endpoint_url(endpoint)?,
            body,
        };

        let preferred = self.request_protocol().await;
        let (first, second) = match preferred {
            Protocol::Simple => (&self.simple, &self.fast),
            _ => (&self.fast, &self.simple),
        };

        let response = match first.execute(&request).await {
            Ok(response) => {
                self.remember(first.protocol(), &request).await;
                response
            }
            Err(e) => {
                warn!(
                    method = %request.method,
                    endpoint,
                    "{} failed: {}, falling back to {}",
                    first.protocol(),
                    e,
                    second.protocol()
                );
                match second.execute(&request).await {
                    Ok(response) => {
                        self.remember(second.protocol(), &request).await;
                        response
                    }
                    Err(e) => {
                        return Err(TransportError::Protocol {
                            protocol: second.protocol(),
                            endpoint: endpoint.to_string(),
                            source: Box::new(e),
                        });
                    }
                }
            }
        };

        if response.is_success() {
            Ok(response)
        } else {
            Err(TransportError::Status { status: response.status, body: response.text() })
        }
    }

    async fn remember(&self, protocol: Protocol, request: &ApiRequest) {
        if self.request_protocol().await == protocol {
            debug!("Using {} for {} {}", protocol, request.method, request.endpoint);
            return;
        }

        let mut state = self.state.write().await;
        if state.request_protocol != protocol {
            info!(from = %state.request_protocol, to = %protocol, "Request protocol selected");
            state.request_protocol = protocol;
        }
    }
}

#[async_trait::async_trait]
impl Controller for ControllerClient {
    async fn fetch_targets(&self) -> Result<Vec<Target>, TransportError> {
        ControllerClient::fetch_targets(self).await
    }

    async fn submit_result(&self, result: &CheckResult) -> Result<SubmitRoute, TransportError> {
        ControllerClient::submit_result(self, result).await
    }

    async fn is_push_connected(&self) -> bool {
        ControllerClient::is_push_connected(self).await
    }

    async fn reconnect_push(&self, cancel: &CancellationToken) {
        if !self.config.use_websocket || cancel.is_cancelled() {
            return;
        }

        match self.connect_push(cancel).await {
            Ok(()) => info!("Push channel re-established"),
            Err(e) => warn!("Push reconnect failed, staying on polling: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{FakeTransport, FakeWriter};

    struct Harness {
        client: ControllerClient,
        fast: Arc<FakeTransport>,
        simple: Arc<FakeTransport>,
    }

    fn harness(body: &str) -> Harness {
        let fast = Arc::new(FakeTransport::new(Protocol::Multiplexed, 200, body));
        let simple = Arc::new(FakeTransport::new(Protocol::Simple, 200, body));
        let config = ControllerConfig::new("http://controller.test", "k".repeat(64), "agent-1");
        let client = ControllerClient::with_transports(config, fast.clone(), simple.clone());
        Harness { client, fast, simple }
    }

    async fn attach_writer(client: &ControllerClient, writer: Arc<FakeWriter>) {
        client.state.write().await.attach(writer);
    }

    #[tokio::test]
    async fn test_unknown_protocol_tries_fast_first() {
        let h = harness("[]");

        h.client.fetch_targets().await.unwrap();

        assert_eq!(h.fast.calls(), 1);
        assert_eq!(h.simple.calls(), 0);
        assert_eq!(h.client.request_protocol().await, Protocol::Multiplexed);
    }

    #[tokio::test]
    async fn test_fast_failure_sticks_to_simple_until_it_fails() {
        let h = harness("[]");
        h.fast.set_failing(true);

        h.client.fetch_targets().await.unwrap();
        assert_eq!((h.fast.calls(), h.simple.calls()), (1, 1));
        assert_eq!(h.client.request_protocol().await, Protocol::Simple);

        // Sticky: no further fast attempts while simple keeps working
        h.client.fetch_targets().await.unwrap();
        h.client.fetch_targets().await.unwrap();
        assert_eq!((h.fast.calls(), h.simple.calls()), (1, 3));

        // Simple breaks, fast recovered
        h.simple.set_failing(true);
        h.fast.set_failing(false);
        h.client.fetch_targets().await.unwrap();
        assert_eq!((h.fast.calls(), h.simple.calls()), (2, 4));
        assert_eq!(h.client.request_protocol().await, Protocol::Multiplexed);
    }

    #[tokio::test]
    async fn test_both_protocols_failing_is_tagged() {
        let h = harness("[]");
        h.fast.set_failing(true);
        h.simple.set_failing(true);

        let err = h.client.fetch_targets().await.unwrap_err();
        match err {
            TransportError::Protocol { protocol, endpoint, .. } => {
                assert_eq!(protocol, Protocol::Simple);
                assert_eq!(endpoint, TARGETS_ENDPOINT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.client.request_protocol().await, Protocol::Unknown);
    }

    #[tokio::test]
    async fn test_error_status_carries_code_and_body() {
        let h = harness("invalid api key");
        h.fast.set_status(401);

        let err = h.client.fetch_targets().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("invalid api key"));
        // A completed exchange is not a protocol failure
        assert_eq!(h.simple.calls(), 0);
    }

    #[tokio::test]
    async fn test_request_carries_url_and_body() {
        let h = harness(r#"{"submitted":1,"total":1}"#);

        let route = h.client.submit_result(&CheckResult::new(4)).await.unwrap();
        assert_eq!(route, SubmitRoute::Request { accepted: true });

        let request = h.fast.last_request().unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.as_str(), "http://controller.test:5227/agent/checks");

        let sent: Vec<CheckResult> = serde_json::from_slice(&request.body.unwrap()).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target_id, 4);
    }

    #[tokio::test]
    async fn test_submit_prefers_connected_push_channel() {
        let h = harness("{}");
        let writer = Arc::new(FakeWriter::default());
        attach_writer(&h.client, writer.clone()).await;

        let route = h.client.submit_result(&CheckResult::new(1)).await.unwrap();

        assert_eq!(route, SubmitRoute::Push);
        assert_eq!(h.fast.calls() + h.simple.calls(), 0);
        assert!(matches!(writer.sent()[0], PushMessage::CheckResult(ref r) if r.target_id == 1));
    }

    #[tokio::test]
    async fn test_submit_without_push_uses_request_path_once() {
        let h = harness(r#"{"submitted":1,"total":1}"#);

        let route = h.client.submit_result(&CheckResult::new(1)).await.unwrap();

        assert!(matches!(route, SubmitRoute::Request { .. }));
        assert_eq!(h.fast.calls() + h.simple.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_push_write_falls_back() {
        let h = harness(r#"{"submitted":0,"total":1,"errors":["unknown site"]}"#);
        let writer = Arc::new(FakeWriter::default());
        writer.set_failing(true);
        attach_writer(&h.client, writer).await;

        let route = h.client.submit_result(&CheckResult::new(1)).await.unwrap();

        assert_eq!(route, SubmitRoute::Request { accepted: false });
        assert_eq!(h.fast.calls(), 1);
    }

    #[tokio::test]
    async fn test_register_decodes_ack() {
        let h = harness(r#"{"message":"Agent registered successfully","agent_id":"agent-1"}"#);

        let ack = h.client.register().await.unwrap();
        assert_eq!(ack.agent_id.as_deref(), Some("agent-1"));

        let sent: Registration =
            serde_json::from_slice(&h.fast.last_request().unwrap().body.unwrap()).unwrap();
        assert_eq!(sent.agent_id, "agent-1");
    }

    #[tokio::test]
    async fn test_establish_without_push() {
        let fast = Arc::new(
            FakeTransport::new(Protocol::Multiplexed, 200, "[]")
                .with_route(REGISTER_ENDPOINT, r#"{"message":"ok"}"#)
                .with_route(
                    TARGETS_ENDPOINT,
                    r#"[{"id":1,"url":"https://example.com","name":"ex","scan_interval":"30s"}]"#,
                ),
        );
        let simple = Arc::new(FakeTransport::new(Protocol::Simple, 200, "[]"));
        let mut config = ControllerConfig::new("http://controller.test", "k".repeat(64), "a");
        config.use_websocket = false;
        let client = ControllerClient::with_transports(config, fast.clone(), simple);

        let err = client.connect_push(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::PushDisabled));

        let targets = client.establish(&CancellationToken::new()).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(fast.calls(), 2);
        assert!(!client.is_push_connected().await);
        assert_eq!(client.current_protocol().await, Protocol::Multiplexed);
    }

    #[tokio::test]
    async fn test_establish_fails_when_registration_rejected() {
        let h = harness("forbidden");
        h.fast.set_status(403);

        let err = h.client.establish(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(h.fast.calls(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_reports_protocol() {
        let h = harness("[]");
        let writer = Arc::new(FakeWriter::default());
        attach_writer(&h.client, writer.clone()).await;
        assert_eq!(h.client.current_protocol().await, Protocol::Realtime);

        h.client.close().await;
        h.client.close().await;

        assert!(writer.is_closed());
        assert!(!h.client.is_push_connected().await);
        assert_eq!(h.client.current_protocol().await, Protocol::Unknown);
    }

    #[tokio::test]
    async fn test_updates_receiver_handed_out_once() {
        let h = harness("[]");
        assert!(h.client.take_updates().await.is_some());
        assert!(h.client.take_updates().await.is_none());
    }
}
