//! Controller connection settings and address construction.

use std::time::Duration;

use url::Url;

use crate::error::TransportError;
use crate::PUSH_ENDPOINT;

/// Default port of the controller's agent server
pub const DEFAULT_CONTROLLER_PORT: u16 = 5227;

/// Default user agent sent with every controller call
pub const DEFAULT_USER_AGENT: &str = "SiteUp-Agent/1.0";

/// Everything the transport needs to reach and authenticate with a controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base address of the controller, e.g. `https://monitor.example.com`
    pub base_url: String,

    /// Port of the controller's agent server, replacing any port in `base_url`
    pub port: u16,

    /// Pre-shared credential
    pub api_key: String,

    pub agent_id: String,
    pub hostname: String,
    pub user_agent: String,

    /// Whether the push channel should be attempted at all
    pub use_websocket: bool,

    pub request_timeout: Duration,
    pub push_connect_timeout: Duration,

    /// Capacity of the queue carrying pushed target lists to the scheduler
    pub update_queue_capacity: usize,
}

impl ControllerConfig {
    /// Create a configuration with default ports, timeouts and queue size
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        let agent_id = agent_id.into();
        Self {
            base_url: base_url.into(),
            port: DEFAULT_CONTROLLER_PORT,
            api_key: api_key.into(),
            hostname: agent_id.clone(),
            agent_id,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            use_websocket: true,
            request_timeout: Duration::from_secs(30),
            push_connect_timeout: Duration::from_secs(10),
            update_queue_capacity: 10,
        }
    }

    /// Controller address with the agent server port applied
    fn base(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.base_url)?;
        url.set_port(Some(self.port)).map_err(|()| {
            TransportError::Address(format!("cannot set port on {}", self.base_url))
        })?;
        Ok(url)
    }

    /// Full URL of a request/response endpoint
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, TransportError> {
        let mut url = self.base()?;
        let path = format!("{}{}", url.path().trim_end_matches('/'), endpoint);
        url.set_path(&path);
        Ok(url)
    }

    /// URL of the push channel, carrying the agent id and credential as query
    /// parameters
    pub fn push_url(&self) -> Result<Url, TransportError> {
        let mut url = self.endpoint_url(PUSH_ENDPOINT)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| {
            TransportError::Address(format!("cannot use {scheme} for {}", self.base_url))
        })?;
        url.query_pairs_mut()
            .clear()
            .append_pair("agent_id", &self.agent_id)
            .append_pair("api_key", &self.api_key);
        Ok(url)
    }
}
