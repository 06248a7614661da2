//! Backend for OpenAI-compatible chat completion APIs.
//!
//! Used for Moonshot (`https://api.moonshot.cn`), and works against any
//! provider exposing `/v1/chat/completions` with bearer authentication.
//! Streaming: SSE with `data: {"choices": [{"delta": {"content": "..."}}]}`.

use super::sse::{SseDecoder, SseItem};
use super::{http_error, Backend, LlmRequest, LlmResponse};
use crate::config::redact;
use crate::error::{Result, TaskError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for any OpenAI-compatible API.
///
/// ```
/// use llm_tasks::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new().with_api_key("sk-...");
/// assert!(backend.has_api_key());
/// ```
#[derive(Clone, Default)]
pub struct OpenAiBackend {
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sent as `Authorization: Bearer {key}`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{}/v1/chat/completions", base)
    }

    fn build_body(request: &LlmRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(t) = request.options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = request.options.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(n) = request.options.max_tokens {
            body["max_tokens"] = json!(n);
        }
        body
    }

    fn build_http_request(&self, client: &Client, url: &str, body: &Value) -> reqwest::RequestBuilder {
        let req = client.post(url).json(body);
        match self.api_key {
            Some(ref key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send(&self, client: &Client, base_url: &str, request: &LlmRequest, stream: bool) -> Result<reqwest::Response> {
        let url = Self::endpoint(base_url);
        let body = Self::build_body(request, stream);
        tracing::debug!(url = %url, model = %request.model, stream, "sending chat completion");

        let resp = self.build_http_request(client, &url, &body).send().await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }
        Ok(resp)
    }

    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let meta: serde_json::Map<String, Value> = ["usage", "model", "id"]
            .iter()
            .filter_map(|k| json_resp.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        if meta.is_empty() {
            None
        } else {
            Some(Value::Object(meta))
        }
    }

    fn delta_content(item: &SseItem) -> Result<Option<&str>> {
        let value = item.value();
        if let Some(err) = value.get("error") {
            return Err(api_error(err));
        }
        Ok(value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty()))
    }
}

/// OpenAI-style `{"error": {"message": ..., "code": ...}}` payload.
fn api_error(err: &Value) -> TaskError {
    TaskError::Provider {
        code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
        message: err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let resp = self.send(client, base_url, request, false).await?;
        let status = resp.status().as_u16();
        let json_resp: Value = resp.json().await?;

        if let Some(err) = json_resp.get("error") {
            return Err(api_error(err));
        }

        let text = json_resp
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        Ok(LlmResponse {
            text,
            status,
            metadata: Self::extract_metadata(&json_resp),
        })
    }

    async fn complete_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse> {
        let resp = self.send(client, base_url, request, true).await?;
        let status = resp.status().as_u16();

        let mut stream = resp.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut accumulated = String::new();

        while let Some(chunk) = stream.next().await {
            for item in decoder.push(&chunk?) {
                if let Some(content) = Self::delta_content(&item)? {
                    accumulated.push_str(content);
                    on_token(content.to_string());
                }
            }
        }
        for item in decoder.finish() {
            if let Some(content) = Self::delta_content(&item)? {
                accumulated.push_str(content);
                on_token(content.to_string());
            }
        }

        Ok(LlmResponse {
            text: accumulated,
            status,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatMessage, GenerationOptions, Role};

    fn qa_request() -> LlmRequest {
        LlmRequest {
            model: "moonshot-v1-128k".into(),
            messages: vec![
                ChatMessage::new(Role::System, "学习和分析它"),
                ChatMessage::new(Role::User, "<Context>text</Context>"),
            ],
            options: GenerationOptions::default(),
            stream: false,
        }
    }

    #[test]
    fn body_keeps_message_order_and_roles() {
        let body = OpenAiBackend::build_body(&qa_request(), false);
        assert_eq!(body["model"], "moonshot-v1-128k");
        assert_eq!(body["stream"], false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "<Context>text</Context>");
    }

    #[test]
    fn unset_options_are_omitted() {
        let body = OpenAiBackend::build_body(&qa_request(), true);
        assert_eq!(body["stream"], true);
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn set_options_are_forwarded() {
        let mut request = qa_request();
        request.options = GenerationOptions::default()
            .with_temperature(0.3)
            .with_max_tokens(4096);
        let body = OpenAiBackend::build_body(&request, false);
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn endpoint_tolerates_v1_suffix() {
        assert_eq!(
            OpenAiBackend::endpoint("https://api.moonshot.cn/v1/"),
            "https://api.moonshot.cn/v1/chat/completions"
        );
        assert_eq!(
            OpenAiBackend::endpoint("https://api.moonshot.cn"),
            "https://api.moonshot.cn/v1/chat/completions"
        );
    }

    #[test]
    fn bearer_header_is_set() {
        let backend = OpenAiBackend::new().with_api_key("sk-test123");
        let req = backend
            .build_http_request(&Client::new(), "https://api.moonshot.cn/v1/chat/completions", &json!({}))
            .build()
            .unwrap();
        assert_eq!(req.headers().get("Authorization").unwrap(), "Bearer sk-test123");
    }

    #[test]
    fn stream_error_event_becomes_provider_error() {
        let item = SseItem::Data(json!({"error": {"message": "rate limited", "code": 429}}));
        let err = OpenAiBackend::delta_content(&item).unwrap_err();
        assert!(matches!(err, TaskError::Provider { code: 429, .. }));
    }

    #[test]
    fn delta_events_yield_content() {
        let mut decoder = SseDecoder::default();
        let items = decoder.push(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n\
             data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"[{\\\"instruction\\\"\"}}]}\n\n\
             data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
             data: [DONE]\n\n"
                .as_bytes(),
        );
        let contents: Vec<Option<&str>> = items
            .iter()
            .map(|item| OpenAiBackend::delta_content(item).unwrap())
            .collect();
        assert_eq!(contents, vec![None, Some("[{\"instruction\""), None]);
    }

    #[tokio::test]
    async fn streaming_joins_deltas_from_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "moonshot-v1-128k", "stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(
                "data: {\"choices\":[{\"delta\":{\"content\":\"细胞\"}}]}\n\n\
                 data: {\"choices\":[{\"delta\":{\"content\":\"理论\"}}]}\n\n\
                 data: [DONE]\n\n",
            )
            .create_async()
            .await;

        let backend = OpenAiBackend::new().with_api_key("sk-test");
        let mut tokens = Vec::new();
        let response = backend
            .complete_streaming(&Client::new(), &server.url(), &qa_request(), &mut |t| tokens.push(t))
            .await
            .unwrap();

        assert_eq!(response.text, "细胞理论");
        assert_eq!(tokens, vec!["细胞", "理论"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn blocking_reply_reads_message_content() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "id": "cmpl-1",
                    "model": "moonshot-v1-128k",
                    "choices": [{"message": {"role": "assistant", "content": "[]"}}],
                    "usage": {"total_tokens": 7}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = OpenAiBackend::new()
            .complete(&Client::new(), &server.url(), &qa_request())
            .await
            .unwrap();
        assert_eq!(response.text, "[]");
        assert_eq!(response.metadata.unwrap()["usage"]["total_tokens"], 7);
    }

    #[test]
    fn debug_redacts_api_key() {
        let backend = OpenAiBackend::new().with_api_key("sk-1234567890abcdef");
        let debug = format!("{:?}", backend);
        assert!(!debug.contains("1234567890abcdef"));
        assert!(debug.contains("***"));
    }
}
