//! Telegram Bot API adapter.
//!
//! Implements the `telepoll-core` [`UpdateSource`] port with `getUpdates` long
//! polling and `getMe` over HTTPS.
//! Docs: <https://core.telegram.org/bots/api>

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use telepoll_core::{
    classify::classify_batch,
    config::Config,
    domain::UpdateId,
    errors::Error,
    ports::UpdateSource,
    types::User,
    update::{RawUpdate, Update},
    Result,
};

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesParams {
    offset: i64,
    timeout: u64,
}

#[derive(Clone, Debug)]
pub struct TelegramTransport {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramTransport {
    /// `http_timeout` must exceed the long-poll timeout, otherwise every idle
    /// poll would surface as a client-side timeout.
    pub fn new(api_url: &str, token: &str, http_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| Error::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{token}", api_url.trim_end_matches('/')),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            &cfg.telegram_api_url,
            &cfg.telegram_bot_token,
            cfg.http_timeout(),
        )
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .json(params)
            .send()
            .await
            .map_err(|e| map_http_err(method, e))?;

        // Error replies (409, 401, 429...) carry the JSON envelope too.
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| map_http_err(method, e))?;
        debug!(method, %status, bytes = body.len(), "bot api response");

        decode_response(&body)
    }
}

#[async_trait]
impl UpdateSource for TelegramTransport {
    async fn fetch_updates(&self, offset: UpdateId, timeout_secs: u64) -> Result<Vec<Update>> {
        let params = GetUpdatesParams {
            offset: offset.0,
            timeout: timeout_secs,
        };
        let raw: Vec<RawUpdate> = self.call("getUpdates", &params).await?;
        Ok(classify_batch(raw))
    }

    async fn get_me(&self) -> Result<User> {
        self.call("getMe", &serde_json::json!({})).await
    }
}

/// Decode a Bot API reply body into its `result`.
fn decode_response<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let resp: ApiResponse<T> = serde_json::from_slice(body)?;

    if !resp.ok {
        return Err(Error::Api {
            code: resp.error_code,
            description: resp
                .description
                .unwrap_or_else(|| "request failed without description".to_string()),
        });
    }

    resp.result
        .ok_or_else(|| Error::Transport("bot api reply is missing `result`".to_string()))
}

/// reqwest errors embed the request URL, which contains the bot token.
fn map_http_err(method: &str, e: reqwest::Error) -> Error {
    Error::Transport(format!("{method} failed: {}", e.without_url()))
}
