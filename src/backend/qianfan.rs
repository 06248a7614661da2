//! Backend for Baidu Qianfan chat endpoints.
//!
//! Authentication is a two-step exchange: the access key / secret key pair is
//! traded for an OAuth access token at `/oauth/2.0/token`, which is then sent
//! as the `access_token` query parameter. Tokens are cached until shortly
//! before they expire.
//!
//! Endpoint: `/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/{endpoint}`.
//! The deployed model is selected by the endpoint path, not the request body.
//! Application errors come back as HTTP 200 with `error_code`/`error_msg`.

use super::sse::SseDecoder;
use super::{http_error, Backend, LlmRequest, LlmResponse, Role};
use crate::config::redact;
use crate::error::{Result, TaskError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "eb-instant";

/// `error_code` values meaning the cached token is no longer accepted.
const TOKEN_ERROR_CODES: [i64; 2] = [110, 111];

/// Refresh this long before the advertised expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Qianfan chat backend.
///
/// ```
/// use llm_tasks::backend::QianfanBackend;
///
/// let backend = QianfanBackend::new("ak", "sk").with_endpoint("eb-instant");
/// assert_eq!(backend.endpoint(), "eb-instant");
/// ```
pub struct QianfanBackend {
    access_key: String,
    secret_key: String,
    endpoint: String,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for QianfanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QianfanBackend")
            .field("access_key", &redact(&Some(self.access_key.clone())))
            .field("secret_key", &redact(&Some(self.secret_key.clone())))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl QianfanBackend {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: Mutex::new(None),
        }
    }

    /// Select the deployed service, e.g. `"eb-instant"` or `"completions_pro"`.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn chat_url(&self, base_url: &str) -> String {
        format!(
            "{}/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/{}",
            base_url.trim_end_matches('/'),
            self.endpoint
        )
    }

    /// System messages go into the top-level `system` field; the rest stay in
    /// `messages` in order.
    fn build_body(request: &LlmRequest, stream: bool) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = json!({
            "messages": messages,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n"));
        }
        if let Some(t) = request.options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = request.options.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(n) = request.options.max_tokens {
            body["max_output_tokens"] = json!(n);
        }
        body
    }

    async fn access_token(&self, client: &Client, base_url: &str) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(ref token) = *guard {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/oauth/2.0/token", base_url.trim_end_matches('/'));
        tracing::debug!(url = %url, "requesting qianfan access token");
        let resp = client
            .post(&url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.access_key.as_str()),
                ("client_secret", self.secret_key.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }

        let token = parse_token_response(resp.json().await?)?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn post(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let token = self.access_token(client, base_url).await?;
        let url = self.chat_url(base_url);
        let body = Self::build_body(request, stream);
        tracing::debug!(url = %url, model = %request.model, stream, "sending qianfan chat");

        let resp = client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }
        Ok(resp)
    }

    /// Drop the cached token when the provider rejects it. Returns `true` if
    /// the caller should try again.
    async fn should_refresh(&self, err: &TaskError, attempt: u32) -> bool {
        let expired = matches!(err, TaskError::Provider { code, .. } if TOKEN_ERROR_CODES.contains(code));
        if expired && attempt == 0 {
            tracing::debug!("qianfan access token rejected, refreshing");
            self.invalidate_token().await;
            return true;
        }
        false
    }

    async fn stream_once(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse> {
        let resp = self.post(client, base_url, request, true).await?;
        let status = resp.status().as_u16();

        // Errors are reported as a plain JSON body even in stream mode.
        if is_json(&resp) {
            let value: Value = resp.json().await?;
            check_provider_error(&value)?;
            let text = result_text(&value).to_string();
            if !text.is_empty() {
                on_token(text.clone());
            }
            return Ok(LlmResponse {
                text,
                status,
                metadata: value.get("usage").cloned(),
            });
        }

        let mut stream = resp.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut reply = StreamReply::default();

        while let Some(chunk) = stream.next().await {
            for item in decoder.push(&chunk?) {
                if let Some(fragment) = reply.apply(item.value())? {
                    on_token(fragment.to_string());
                }
            }
        }
        for item in decoder.finish() {
            if let Some(fragment) = reply.apply(item.value())? {
                on_token(fragment.to_string());
            }
        }

        Ok(LlmResponse {
            text: reply.text,
            status,
            metadata: reply.usage,
        })
    }
}

/// Streamed `result` fragments folded into one reply.
#[derive(Debug, Default)]
struct StreamReply {
    text: String,
    /// Taken from the event flagged `is_end`.
    usage: Option<Value>,
}

impl StreamReply {
    /// Fold in one event and return its text fragment, if it carried one.
    fn apply<'a>(&mut self, event: &'a Value) -> Result<Option<&'a str>> {
        check_provider_error(event)?;
        if event.get("is_end").and_then(Value::as_bool) == Some(true) {
            self.usage = event.get("usage").cloned();
        }
        let fragment = result_text(event);
        if fragment.is_empty() {
            return Ok(None);
        }
        self.text.push_str(fragment);
        Ok(Some(fragment))
    }
}

fn parse_token_response(token: TokenResponse) -> Result<AccessToken> {
    match token.access_token {
        Some(value) => Ok(AccessToken {
            value,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.unwrap_or(0)),
        }),
        None => Err(TaskError::Provider {
            code: -1,
            message: format!(
                "token exchange failed: {} {}",
                token.error.unwrap_or_default(),
                token.error_description.unwrap_or_default()
            )
            .trim()
            .to_string(),
        }),
    }
}

fn check_provider_error(value: &Value) -> Result<()> {
    match value.get("error_code").and_then(Value::as_i64) {
        Some(code) => Err(TaskError::Provider {
            code,
            message: value
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
        None => Ok(()),
    }
}

fn result_text(value: &Value) -> &str {
    value.get("result").and_then(Value::as_str).unwrap_or("")
}

fn is_json(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

#[async_trait]
impl Backend for QianfanBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            let resp = self.post(client, base_url, request, false).await?;
            let status = resp.status().as_u16();
            let value: Value = resp.json().await?;

            if let Err(err) = check_provider_error(&value) {
                if self.should_refresh(&err, attempt).await {
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }

            return Ok(LlmResponse {
                text: result_text(&value).to_string(),
                status,
                metadata: value.get("usage").cloned(),
            });
        }
    }

    async fn complete_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            let err = match self.stream_once(client, base_url, request, on_token).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if !self.should_refresh(&err, attempt).await {
                return Err(err);
            }
            attempt += 1;
        }
    }

    fn name(&self) -> &'static str {
        "qianfan"
    }
}
