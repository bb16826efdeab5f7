use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, http::header::InvalidHeaderValue};

use crate::transport::Protocol;

/// Errors raised while talking to the controller
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    /// The last protocol attempted for a request, with the failure it hit
    #[error("{protocol} request to {endpoint} failed: {source}")]
    Protocol {
        protocol: Protocol,
        endpoint: String,
        #[source]
        source: Box<TransportError>,
    },

    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode or decode payload: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid controller address: {0}")]
    Address(String),

    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),

    #[error("push handshake rejected (HTTP {status}): {body}")]
    Handshake { status: u16, body: String },

    #[error("push channel error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("push connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("push channel not connected")]
    NotConnected,

    #[error("push channel disabled in configuration")]
    PushDisabled,
}

impl TransportError {
    /// HTTP status code carried by this error, looking through protocol tags
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } | TransportError::Handshake { status, .. } => {
                Some(*status)
            }
            TransportError::Protocol { source, .. } => source.status(),
            _ => None,
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        TransportError::Address(err.to_string())
    }
}
