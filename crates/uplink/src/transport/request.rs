use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, ClientBuilder, Method};
use serde::de::DeserializeOwned;
use url::Url;

use super::state::Protocol;
use crate::config::ControllerConfig;
use crate::error::TransportError;

/// Header carrying the raw credential next to the bearer token
pub const API_KEY_HEADER: &str = "x-api-key";

/// A request/response call, built once and replayable on either protocol
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub endpoint: String,
    pub url: Url,
    /// JSON body
    pub body: Option<Vec<u8>>,
}

/// Status and body of a completed call
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// One way of carrying request/response traffic to the controller
#[async_trait::async_trait]
pub trait RequestTransport: Send + Sync {
    /// Protocol this transport speaks
    fn protocol(&self) -> Protocol;

    /// Perform the call. Any response, whatever its status, is `Ok`; only
    /// failures to complete the exchange are errors.
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed transport pinned to one HTTP version
pub struct HttpTransport {
    client: Client,
    protocol: Protocol,
    api_key: String,
}

impl HttpTransport {
    /// HTTP/2 transport (prior knowledge, no upgrade dance)
    pub fn multiplexed(config: &ControllerConfig) -> Result<Self, TransportError> {
        let client = Self::builder(config).http2_prior_knowledge().build()?;
        Ok(Self { client, protocol: Protocol::Multiplexed, api_key: config.api_key.clone() })
    }

    /// HTTP/1.1 transport
    pub fn simple(config: &ControllerConfig) -> Result<Self, TransportError> {
        let client = Self::builder(config).http1_only().build()?;
        Ok(Self { client, protocol: Protocol::Simple, api_key: config.api_key.clone() })
    }

    fn builder(config: &ControllerConfig) -> ClientBuilder {
        Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
    }
}

#[async_trait::async_trait]
impl RequestTransport for HttpTransport {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut http_request = self
            .client
            .request(request.method.clone(), request.url.clone())
            .bearer_auth(&self.api_key)
            .header(API_KEY_HEADER, &self.api_key);

        if let Some(body) = &request.body {
            http_request = http_request
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body.clone());
        }

        let response = http_request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(ApiResponse { status, body })
    }
}
