//! ==============================================================================
//! broker.rs - cloud broker access layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the three broker endpoints we use
//!     (batch get, single get, update). abstracts away the difference between
//!     the real cloud service (over https with reqwest) and the scripted broker
//!     used by the tests.
//!
//! design:
//!     - the trait only moves bytes: status code + body text. deciding what a
//!       status means, and parsing values, is gateway.rs's job.
//!     - a transport failure (dns, connect, timeout) is an Err; any http
//!       answer, including 4xx/5xx, is an Ok(BrokerResponse).
//!     - the auth token is appended to the query here and nowhere else. log
//!       lines carry the path only.
//!
//! relationships:
//!     - used by: gateway.rs (fetch_current, toggle_device)
//!     - uses: reqwest (HttpBroker)
//!
//! ==============================================================================

use crate::config::{BrokerConfig, BrokerToken};
use crate::error::GatewayError;

use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// raw broker answer
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerResponse {
    pub status: u16,
    pub body: String,
}

impl BrokerResponse {
    #[cfg(test)]
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// first few hundred chars of the body, for log lines and error messages
    pub fn excerpt(&self) -> &str {
        match self.body.char_indices().nth(200) {
            Some((idx, _)) => &self.body[..idx],
            None => &self.body,
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// GET /external/api/batch/get for several channels at once
    async fn batch_get(&self, channels: &[&str]) -> Result<BrokerResponse, GatewayError>;

    /// GET /external/api/get for a single channel
    async fn get(&self, channel: &str) -> Result<BrokerResponse, GatewayError>;

    /// GET /external/api/update, writing `value` to `channel`
    async fn update(&self, channel: &str, value: i64) -> Result<BrokerResponse, GatewayError>;
}

// ==============================================================================================
// HTTP IMPLEMENTATION (the real cloud broker)
// ==============================================================================================

pub struct HttpBroker {
    client: reqwest::Client,
    base_url: String,
    token: BrokerToken,
    batch_timeout: Duration,
    channel_timeout: Duration,
}

impl HttpBroker {
    pub fn new(config: &BrokerConfig, token: BrokerToken) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            batch_timeout: config.batch_timeout(),
            channel_timeout: config.channel_timeout(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&format!("{}/external/api/{}", self.base_url, path))
            .map_err(|e| GatewayError::Transport(format!("bad broker url: {}", e)))?;
        url.query_pairs_mut().append_pair("token", self.token.expose());
        Ok(url)
    }

    async fn send(&self, url: Url, timeout: Duration) -> Result<BrokerResponse, GatewayError> {
        let path = url.path().to_string();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            // reqwest errors embed the url (and with it the token)
            .map_err(|e| GatewayError::Transport(format!("{} failed: {}", path, e.without_url())))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("{} body: {}", path, e.without_url())))?;

        debug!("[BROKER] {} -> {}", path, status);
        Ok(BrokerResponse { status, body })
    }
}

#[async_trait]
impl Broker for HttpBroker {
    async fn batch_get(&self, channels: &[&str]) -> Result<BrokerResponse, GatewayError> {
        let mut url = self.endpoint("batch/get")?;
        {
            let mut query = url.query_pairs_mut();
            for channel in channels {
                query.append_key_only(channel);
            }
        }
        self.send(url, self.batch_timeout).await
    }

    async fn get(&self, channel: &str) -> Result<BrokerResponse, GatewayError> {
        let mut url = self.endpoint("get")?;
        url.query_pairs_mut().append_key_only(channel);
        self.send(url, self.channel_timeout).await
    }

    async fn update(&self, channel: &str, value: i64) -> Result<BrokerResponse, GatewayError> {
        let mut url = self.endpoint("update")?;
        url.query_pairs_mut().append_pair(channel, &value.to_string());
        self.send(url, self.channel_timeout).await
    }
}
