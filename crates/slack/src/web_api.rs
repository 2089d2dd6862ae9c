use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::blocks::{Block, MessageTemplate};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebApiError {
    #[error("slack api request failed: {0}")]
    Transport(String),
    #[error("slack api rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("slack api returned http status {status}")]
    Http { status: u16 },
    #[error("slack api method `{method}` failed: {error}")]
    Api { method: &'static str, error: String },
    #[error("slack api response could not be decoded: {0}")]
    InvalidResponse(String),
}

/// Who the bot is, as reported by `auth.test`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BotIdentity {
    pub user_id: Option<String>,
    pub bot_id: Option<String>,
    pub team: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub channel: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
}

impl OutgoingMessage {
    pub fn from_template(
        channel: impl Into<String>,
        template: MessageTemplate,
        thread_ts: Option<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            text: template.fallback_text,
            thread_ts,
            blocks: template.blocks,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PostedMessage {
    pub channel: Option<String>,
    pub ts: Option<String>,
}

#[async_trait]
pub trait SlackWebApi: Send + Sync {
    async fn auth_test(&self) -> Result<BotIdentity, WebApiError>;
    async fn post_message(&self, message: &OutgoingMessage) -> Result<PostedMessage, WebApiError>;
}

/// Accepts every call without touching the network. Used when the process runs
/// without outbound access, e.g. local smoke runs with `verify_token_on_startup = false`.
#[derive(Default)]
pub struct NoopSlackWebApi;

#[async_trait]
impl SlackWebApi for NoopSlackWebApi {
    async fn auth_test(&self) -> Result<BotIdentity, WebApiError> {
        Ok(BotIdentity::default())
    }

    async fn post_message(&self, message: &OutgoingMessage) -> Result<PostedMessage, WebApiError> {
        Ok(PostedMessage { channel: Some(message.channel.clone()), ts: None })
    }
}

pub struct HttpSlackWebApi {
    client: Client,
    base_url: String,
    bot_token: SecretString,
}

impl HttpSlackWebApi {
    pub fn new(
        base_url: impl Into<String>,
        bot_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, WebApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| WebApiError::Transport(error.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { client, base_url, bot_token })
    }

    async fn call<T>(&self, method: &'static str, body: &Value) -> Result<T, WebApiError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| WebApiError::Transport(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            return Err(WebApiError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(WebApiError::Http { status: status.as_u16() });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| WebApiError::InvalidResponse(error.to_string()))?;
        if payload["ok"].as_bool() != Some(true) {
            let error = payload["error"].as_str().unwrap_or("unknown_error").to_owned();
            return Err(WebApiError::Api { method, error });
        }
        debug!(method, "slack api call succeeded");

        serde_json::from_value(payload)
            .map_err(|error| WebApiError::InvalidResponse(error.to_string()))
    }
}

#[async_trait]
impl SlackWebApi for HttpSlackWebApi {
    async fn auth_test(&self) -> Result<BotIdentity, WebApiError> {
        self.call("auth.test", &json!({})).await
    }

    async fn post_message(&self, message: &OutgoingMessage) -> Result<PostedMessage, WebApiError> {
        let body = serde_json::to_value(message)
            .map_err(|error| WebApiError::InvalidResponse(error.to_string()))?;
        self.call("chat.postMessage", &body).await
    }
}
