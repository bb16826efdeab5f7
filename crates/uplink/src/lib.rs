//! Uplink - controller transport for the SiteUp monitoring agent
//!
//! This library owns every exchange between an agent and its controller:
//! registration, target list retrieval and check result submission over a
//! request/response path that negotiates between HTTP/2 and HTTP/1.1, plus a
//! WebSocket push channel for real-time target updates.

pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export main types
pub use config::ControllerConfig;
pub use error::TransportError;
pub use protocol::{CheckResult, CheckStatus, PushMessage, Registration, Target};
pub use transport::{Controller, ControllerClient, Protocol, SubmitRoute};

/// Controller endpoint used to announce the agent
pub const REGISTER_ENDPOINT: &str = "/agent/register";

/// Controller endpoint returning the ordered target list
pub const TARGETS_ENDPOINT: &str = "/agent/sites";

/// Controller endpoint accepting check results
pub const CHECKS_ENDPOINT: &str = "/agent/checks";

/// Controller endpoint upgraded to the push channel
pub const PUSH_ENDPOINT: &str = "/agent/ws";

/// Capabilities announced during registration
pub const CAPABILITIES: [&str; 2] = ["http", "ping"];
