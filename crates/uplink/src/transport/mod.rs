//! Controller transport.
//!
//! Request/response calls negotiate between a multiplexed (HTTP/2) and a
//! simple (HTTP/1.1) protocol and remember whichever last worked. The push
//! channel is a WebSocket carrying target updates in and check results out.

mod client;
mod push;
mod request;
mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Controller, ControllerClient, SubmitRoute};
pub use push::{PushWriter, WsWriter};
pub use request::{ApiRequest, ApiResponse, HttpTransport, RequestTransport};
pub use state::{Protocol, TransportState};
