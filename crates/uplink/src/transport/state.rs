use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::push::PushWriter;

/// Protocol used to reach the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    /// Nothing negotiated yet
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
    /// WebSocket push channel
    #[serde(rename = "wss")]
    Realtime,
    /// HTTP/2
    #[serde(rename = "http2")]
    Multiplexed,
    /// HTTP/1.1
    #[serde(rename = "http1.1")]
    Simple,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Unknown => write!(f, "unknown"),
            Protocol::Realtime => write!(f, "wss"),
            Protocol::Multiplexed => write!(f, "http2"),
            Protocol::Simple => write!(f, "http1.1"),
        }
    }
}

/// Connection state shared between request issuers, the push receive loop
/// and connect/disconnect transitions
#[derive(Default)]
pub struct TransportState {
    /// Sticky protocol of the request/response path
    pub(crate) request_protocol: Protocol,
    push: Option<Arc<dyn PushWriter>>,
    connected: bool,
    /// Bumped on every attach so a stale receive loop cannot tear down a
    /// newer connection
    generation: u64,
}

impl TransportState {
    /// Protocol currently carrying traffic: the push channel while it is up,
    /// otherwise the sticky request protocol
    pub fn current_protocol(&self) -> Protocol {
        if self.connected { Protocol::Realtime } else { self.request_protocol }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn request_protocol(&self) -> Protocol {
        self.request_protocol
    }

    /// Writer of the live push channel, if any
    pub(crate) fn writer(&self) -> Option<Arc<dyn PushWriter>> {
        if self.connected { self.push.clone() } else { None }
    }

    /// Install a freshly connected push writer and return its generation
    pub(crate) fn attach(&mut self, writer: Arc<dyn PushWriter>) -> u64 {
        self.generation += 1;
        self.push = Some(writer);
        self.connected = true;
        self.generation
    }

    /// Release the push writer unconditionally
    pub(crate) fn detach(&mut self) -> Option<Arc<dyn PushWriter>> {
        self.connected = false;
        self.push.take()
    }

    /// Release the push writer only if it still belongs to `generation`
    pub(crate) fn detach_generation(&mut self, generation: u64) -> Option<Arc<dyn PushWriter>> {
        if self.generation == generation { self.detach() } else { None }
    }
}

impl fmt::Debug for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportState")
            .field("request_protocol", &self.request_protocol)
            .field("connected", &self.connected)
            .field("generation", &self.generation)
            .finish()
    }
}
