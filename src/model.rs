//! Chat model handle.
//!
//! [`ChatModel`] carries the HTTP client, backend, base URL, model name,
//! sampling options, streaming flag and retry policy. It is built once per
//! task and reused for every call (one per document chunk in QA generation).

use crate::backend::{
    self, Backend, BackoffConfig, ChatMessage, GenerationOptions, LlmRequest, OpenAiBackend,
    QianfanBackend,
};
use crate::config::Settings;
use crate::error::{Result, TaskError};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Default Qianfan model name (the endpoint selects the deployment).
pub const DEFAULT_QIANFAN_MODEL: &str = "Yi-34B-Chat";
/// Default Moonshot model, sized for long document chunks.
pub const DEFAULT_MOONSHOT_MODEL: &str = "moonshot-v1-128k";

/// A configured chat model.
///
/// ```
/// use llm_tasks::model::ChatModel;
/// use llm_tasks::backend::MockBackend;
/// use std::sync::Arc;
///
/// let model = ChatModel::builder("http://unused", "test-model")
///     .backend(Arc::new(MockBackend::fixed("hi")))
///     .build()
///     .unwrap();
/// assert_eq!(model.model_name(), "test-model");
/// ```
pub struct ChatModel {
    client: Client,
    backend: Arc<dyn Backend>,
    base_url: String,
    model: String,
    options: GenerationOptions,
    streaming: bool,
    backoff: BackoffConfig,
}

impl ChatModel {
    pub fn builder(base_url: impl Into<String>, model: impl Into<String>) -> ChatModelBuilder {
        ChatModelBuilder {
            client: None,
            backend: None,
            base_url: base_url.into(),
            model: model.into(),
            options: GenerationOptions::default(),
            streaming: false,
            backoff: BackoffConfig::none(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Qianfan model using `QIANFAN_AK`/`QIANFAN_SK` from `settings`.
    ///
    /// Streams by default.
    pub fn qianfan(settings: &Settings, model: &str, endpoint: &str) -> Result<ChatModelBuilder> {
        let (ak, sk) = settings.qianfan.credentials()?;
        Ok(Self::builder(&settings.qianfan.base_url, model)
            .backend(Arc::new(QianfanBackend::new(ak, sk).with_endpoint(endpoint)))
            .streaming(true)
            .timeout(settings.timeout)
            .backoff(BackoffConfig::with_retries(settings.max_retries)))
    }

    /// Moonshot model using `MOONSHOT_API_KEY` from `settings`.
    pub fn moonshot(settings: &Settings, model: &str) -> Result<ChatModelBuilder> {
        let key = settings.moonshot.api_key()?;
        Ok(Self::builder(&settings.moonshot.base_url, model)
            .backend(Arc::new(OpenAiBackend::new().with_api_key(key)))
            .timeout(settings.timeout)
            .backoff(BackoffConfig::with_retries(settings.max_retries)))
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Send `messages` and return the reply text.
    ///
    /// In streaming mode tokens are logged at `trace` level as they arrive
    /// and the accumulated text is returned.
    pub async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = LlmRequest {
            model: self.model.clone(),
            messages,
            options: self.options.clone(),
            stream: self.streaming,
        };

        let response = if self.streaming {
            let mut on_token = |token: String| tracing::trace!(token = %token, "token");
            backend::with_backoff(
                &self.backend,
                &self.client,
                &self.base_url,
                &request,
                &self.backoff,
                Some(&mut on_token as &mut (dyn FnMut(String) + Send)),
            )
            .await?
        } else {
            backend::with_backoff(
                &self.backend,
                &self.client,
                &self.base_url,
                &request,
                &self.backoff,
                None,
            )
            .await?
        };

        tracing::debug!(
            backend = self.backend.name(),
            model = %self.model,
            status = response.status,
            chars = response.text.chars().count(),
            "model replied"
        );
        Ok(response.text)
    }
}

impl std::fmt::Debug for ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModel")
            .field("backend", &self.backend.name())
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("options", &self.options)
            .field("streaming", &self.streaming)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Builder for [`ChatModel`].
pub struct ChatModelBuilder {
    client: Option<Client>,
    backend: Option<Arc<dyn Backend>>,
    base_url: String,
    model: String,
    options: GenerationOptions,
    streaming: bool,
    backoff: BackoffConfig,
    timeout: Duration,
}

impl ChatModelBuilder {
    /// Use a preconfigured HTTP client; `timeout` is then ignored.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = config;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ChatModel> {
        let backend = self
            .backend
            .ok_or_else(|| TaskError::InvalidConfig("no backend configured".to_string()))?;
        let client = match self.client {
            Some(client) => client,
            None => Client::builder().timeout(self.timeout).build()?,
        };
        Ok(ChatModel {
            client,
            backend,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            model: self.model,
            options: self.options,
            streaming: self.streaming,
            backoff: self.backoff,
        })
    }
}
