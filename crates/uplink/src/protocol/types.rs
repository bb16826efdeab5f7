//! Record types exchanged with the controller.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::CAPABILITIES;

/// Address prefix selecting the reachability check
pub const PING_SCHEME: &str = "ping://";

/// A monitored endpoint as handed out by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,

    /// HTTP(S) URL, or `ping://host` for a reachability check
    #[serde(rename = "url")]
    pub address: String,

    pub name: String,

    /// Check cadence such as `30s`, `2.5m` or `1h`
    pub scan_interval: String,

    #[serde(default)]
    pub created_at: Option<String>,
}

impl Target {
    /// Host to ping when this target uses the `ping://` scheme
    pub fn ping_host(&self) -> Option<&str> {
        self.address.strip_prefix(PING_SCHEME)
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Up => write!(f, "up"),
            CheckStatus::Down => write!(f, "down"),
        }
    }
}

/// Result of one probe against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(rename = "site_id")]
    pub target_id: i64,

    pub status: CheckStatus,

    /// Response time in seconds
    pub response_time: Option<f64>,

    /// HTTP status code, or process exit code for reachability checks
    pub status_code: Option<i32>,

    pub error_message: Option<String>,

    /// UTC completion time with millisecond precision
    pub checked_at: String,
}

impl CheckResult {
    /// Create a new result, `down` until marked otherwise
    pub fn new(target_id: i64) -> Self {
        Self {
            target_id,
            status: CheckStatus::Down,
            response_time: None,
            status_code: None,
            error_message: None,
            checked_at: timestamp_now(),
        }
    }

    /// Mark the check as successful
    pub fn success(mut self, response_time: f64, status_code: Option<i32>) -> Self {
        self.status = CheckStatus::Up;
        self.response_time = Some(response_time);
        self.status_code = status_code;
        self.error_message = None;
        self
    }

    /// Mark the check as failed with error
    pub fn failure(
        mut self,
        response_time: Option<f64>,
        status_code: Option<i32>,
        error: impl Into<String>,
    ) -> Self {
        self.status = CheckStatus::Down;
        self.response_time = response_time;
        self.status_code = status_code;
        self.error_message = Some(error.into());
        self
    }

    /// Stamp the result with the current time
    pub fn completed(mut self) -> Self {
        self.checked_at = timestamp_now();
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == CheckStatus::Up
    }
}

/// Current UTC time as ISO-8601 with millisecond precision
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Announcement sent once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub agent_id: String,
    pub hostname: String,
    pub version: String,
    pub capabilities: Vec<String>,
}

impl Registration {
    pub fn new(agent_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            hostname: hostname.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Controller reply to a registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationAck {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub server_time: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

/// Controller reply to a check result submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub submitted: u64,
    pub total: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SubmissionReceipt {
    pub fn accepted(&self) -> bool {
        self.submitted >= self.total
    }
}
