use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to chat service failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("chat service responded with status: {0}")]
    Status(StatusCode),

    #[error("request to chat service timed out")]
    Timeout,

    #[error("request task ended before a response arrived")]
    Interrupted,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err)
        }
    }
}

/// One stored user/bot pair as returned by `GET /api/conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub bot: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Boundary to the remote chat service.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn fetch_history(&self) -> Result<Vec<Exchange>, TransportError>;

    async fn send_message(&self, text: &str) -> Result<ChatReply, TransportError>;
}

#[derive(Clone, Debug)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl ChatClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: None,
        }
    }

    /// Fail requests that take longer than `timeout` with [`TransportError::Timeout`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn with_deadline(&self, request: RequestBuilder) -> RequestBuilder {
        match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }
}

#[async_trait]
impl ChatTransport for ChatClient {
    async fn fetch_history(&self) -> Result<Vec<Exchange>, TransportError> {
        let url = format!("{}/api/conversations", self.base_url);
        debug!(%url, "fetching conversation history");

        let response = self.with_deadline(self.client.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }

        Ok(response.json().await?)
    }

    async fn send_message(&self, text: &str) -> Result<ChatReply, TransportError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(%url, chars = text.chars().count(), "sending chat message");

        let response = self
            .with_deadline(self.client.post(&url))
            .json(&ChatRequest { message: text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }

        Ok(response.json().await?)
    }
}
