//! Test doubles for the transport seams.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::push::PushWriter;
use super::request::{ApiRequest, ApiResponse, RequestTransport};
use super::state::Protocol;
use crate::error::TransportError;
use crate::protocol::{PushMessage, Target};

/// Scripted request transport
pub(crate) struct FakeTransport {
    protocol: Protocol,
    status: AtomicU16,
    default_body: String,
    routes: HashMap<String, String>,
    failing: AtomicBool,
    calls: AtomicUsize,
    last_request: Mutex<Option<ApiRequest>>,
}

impl FakeTransport {
    pub(crate) fn new(protocol: Protocol, status: u16, body: &str) -> Self {
        Self {
            protocol,
            status: AtomicU16::new(status),
            default_body: body.to_string(),
            routes: HashMap::new(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Answer `endpoint` with `body` instead of the default
    pub(crate) fn with_route(mut self, endpoint: &str, body: &str) -> Self {
        self.routes.insert(endpoint.to_string(), body.to_string());
        self
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<ApiRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RequestTransport for FakeTransport {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into());
        }

        let body = self.routes.get(&request.endpoint).unwrap_or(&self.default_body);
        Ok(ApiResponse { status: self.status.load(Ordering::SeqCst), body: body.as_bytes().to_vec() })
    }
}

/// Push writer recording everything sent through it
#[derive(Default)]
pub(crate) struct FakeWriter {
    sent: Mutex<Vec<PushMessage>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl FakeWriter {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PushWriter for FakeWriter {
    async fn send(&self, message: &PushMessage) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Targets with the given ids, one `30s` HTTP target each
pub(crate) fn sample_targets(ids: &[i64]) -> Vec<Target> {
    ids.iter()
        .map(|&id| Target {
            id,
            address: format!("https://site-{id}.example.com"),
            name: format!("site-{id}"),
            scan_interval: "30s".to_string(),
            created_at: None,
        })
        .collect()
}
