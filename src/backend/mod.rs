//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over hosted model providers, translating
//! between normalized [`LlmRequest`]/[`LlmResponse`] types and each provider's
//! HTTP API. Built-in implementations: [`QianfanBackend`], [`OpenAiBackend`].
//!
//! ```text
//! ChatModel ──► LlmRequest ──► with_backoff() ──► Backend ──► LlmResponse
//!                                                   │
//!                                     ┌─────────────┴─────────────┐
//!                               QianfanBackend               OpenAiBackend
//!                     /rpc/2.0/.../chat/{endpoint}      /v1/chat/completions
//!                     AK/SK token exchange               bearer key (Moonshot)
//! ```

pub mod backoff;
pub mod mock;
pub mod openai;
pub mod qianfan;
pub mod sse;

pub use backoff::BackoffConfig;
pub use mock::MockBackend;
pub use openai::OpenAiBackend;
pub use qianfan::QianfanBackend;

use crate::error::{Result, TaskError};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Sampling options forwarded to the provider. `None` means "provider default".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// A normalized chat request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"moonshot-v1-128k"`, `"Yi-34B-Chat"`).
    pub model: String,
    /// Rendered conversation, in order.
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
    /// Whether to use the provider's streaming mode.
    pub stream: bool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name used by both supported providers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A normalized model response.
#[derive(Debug)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,
    /// HTTP status code (for diagnostics/logging).
    pub status: u16,
    /// Provider-specific metadata (token usage, ids), stored as raw JSON.
    pub metadata: Option<serde_json::Value>,
}

/// Abstraction over hosted model providers.
///
/// Object-safe; used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a non-streaming call.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Execute a streaming call.
    ///
    /// `on_token` receives each fragment as it arrives; the accumulated text
    /// is returned in the [`LlmResponse`].
    async fn complete_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Whether an error is worth another attempt under `config`.
///
/// Retryable: HTTP statuses listed in `retryable_statuses`, transport errors,
/// and provider error codes listed in `retryable_provider_codes`.
pub fn is_retryable(error: &TaskError, config: &BackoffConfig) -> bool {
    match error {
        TaskError::HttpError { status, .. } => config.retryable_statuses.contains(status),
        TaskError::Provider { code, .. } => config.retryable_provider_codes.contains(code),
        TaskError::Request(_) => true,
        _ => false,
    }
}

/// Execute a backend call with transport-level retry.
///
/// When `on_token` is `Some` the streaming endpoint is used; a retried stream
/// restarts from scratch, so callers may see tokens from a failed attempt.
/// Returns the first successful response or the last error.
pub async fn with_backoff(
    backend: &Arc<dyn Backend>,
    client: &Client,
    base_url: &str,
    request: &LlmRequest,
    config: &BackoffConfig,
    mut on_token: Option<&mut (dyn FnMut(String) + Send)>,
) -> Result<LlmResponse> {
    let mut attempt = 0;
    loop {
        let result = match on_token.as_mut() {
            Some(cb) => {
                backend
                    .complete_streaming(client, base_url, request, &mut **cb)
                    .await
            }
            None => backend.complete(client, base_url, request).await,
        };

        let error = match result {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        if attempt >= config.max_retries || !is_retryable(&error, config) {
            return Err(error);
        }

        let delay = retry_delay(&error, config, attempt);
        attempt += 1;
        tracing::warn!(
            backend = backend.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying model call"
        );
        tokio::time::sleep(delay).await;
    }
}

fn retry_delay(error: &TaskError, config: &BackoffConfig, attempt: u32) -> Duration {
    match error {
        TaskError::HttpError {
            retry_after: Some(ra),
            ..
        } if config.respect_retry_after => *ra,
        _ => config.delay_for_attempt(attempt),
    }
}

/// Parse a `Retry-After` header value given in seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Turn a non-success HTTP response into [`TaskError::HttpError`].
pub(crate) async fn http_error(resp: reqwest::Response) -> TaskError {
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = resp.text().await.unwrap_or_default();
    TaskError::HttpError {
        status,
        body,
        retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pops scripted failures from the back, then succeeds.
    struct Flaky {
        failures: std::sync::Mutex<Vec<TaskError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for Flaky {
        async fn complete(&self, _: &Client, _: &str, _: &LlmRequest) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.failures.lock().unwrap().pop();
            match next {
                Some(err) => Err(err),
                None => Ok(LlmResponse {
                    text: "ok".into(),
                    status: 200,
                    metadata: None,
                }),
            }
        }

        async fn complete_streaming(
            &self,
            client: &Client,
            base_url: &str,
            request: &LlmRequest,
            on_token: &mut (dyn FnMut(String) + Send),
        ) -> Result<LlmResponse> {
            let resp = self.complete(client, base_url, request).await?;
            on_token(resp.text.clone());
            Ok(resp)
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            model: "test".into(),
            messages: vec![ChatMessage::new(Role::User, "hi")],
            options: GenerationOptions::default(),
            stream: false,
        }
    }

    fn fast_retries(max_retries: u32) -> BackoffConfig {
        BackoffConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..BackoffConfig::standard()
        }
    }

    fn status(code: u16) -> TaskError {
        TaskError::HttpError {
            status: code,
            body: String::new(),
            retry_after: None,
        }
    }

    #[test]
    fn retryable_classification() {
        let config = BackoffConfig::standard();
        assert!(is_retryable(&status(429), &config));
        assert!(is_retryable(&status(503), &config));
        assert!(!is_retryable(&status(400), &config));
        assert!(is_retryable(
            &TaskError::Provider {
                code: 18,
                message: "qps".into()
            },
            &config
        ));
        assert!(!is_retryable(
            &TaskError::Provider {
                code: 336003,
                message: "bad params".into()
            },
            &config
        ));
        assert!(!is_retryable(&TaskError::Other("x".into()), &config));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let flaky = Arc::new(Flaky {
            failures: std::sync::Mutex::new(vec![status(503), status(429)]),
            calls: AtomicUsize::new(0),
        });
        let backend: Arc<dyn Backend> = flaky.clone();
        let resp = with_backoff(
            &backend,
            &Client::new(),
            "http://unused",
            &request(),
            &fast_retries(3),
            None,
        )
        .await
        .unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retry_budget_returns_first_error() {
        let flaky = Arc::new(Flaky {
            failures: std::sync::Mutex::new(vec![status(503)]),
            calls: AtomicUsize::new(0),
        });
        let backend: Arc<dyn Backend> = flaky.clone();
        let err = with_backoff(
            &backend,
            &Client::new(),
            "http://unused",
            &request(),
            &BackoffConfig::none(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TaskError::HttpError { status: 503, .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_is_not_retried() {
        let flaky = Arc::new(Flaky {
            failures: std::sync::Mutex::new(vec![status(401)]),
            calls: AtomicUsize::new(0),
        });
        let backend: Arc<dyn Backend> = flaky.clone();
        let result = with_backoff(
            &backend,
            &Client::new(),
            "http://unused",
            &request(),
            &fast_retries(3),
            None,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn streaming_path_forwards_tokens() {
        let backend: Arc<dyn Backend> = Arc::new(Flaky {
            failures: std::sync::Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let mut tokens = Vec::new();
        let mut on_token = |t: String| tokens.push(t);
        with_backoff(
            &backend,
            &Client::new(),
            "http://unused",
            &request(),
            &BackoffConfig::none(),
            Some(&mut on_token as &mut (dyn FnMut(String) + Send)),
        )
        .await
        .unwrap();
        assert_eq!(tokens, vec!["ok".to_string()]);
    }

    #[test]
    fn retry_after_header_parsing() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn retry_after_overrides_computed_delay() {
        let config = fast_retries(3);
        let err = TaskError::HttpError {
            status: 429,
            body: String::new(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(retry_delay(&err, &config, 0), Duration::from_secs(7));
    }
}
