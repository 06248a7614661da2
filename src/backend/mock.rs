//! Scripted backend for tests and offline runs.
//!
//! [`MockBackend`] replies with canned texts in order and records every
//! request it receives so tests can assert on the rendered prompts.
//!
//! ```
//! use llm_tasks::backend::MockBackend;
//!
//! let mock = MockBackend::new(vec!["first".into(), "second".into()]);
//! assert_eq!(mock.requests().len(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::{Result, TaskError};

/// Returns canned responses in order, cycling when exhausted.
///
/// Streaming splits each response into per-character tokens.
#[derive(Debug)]
pub struct MockBackend {
    responses: Vec<String>,
    index: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockBackend {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with the same text.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn next_response(&self, request: &LlmRequest) -> Result<String> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        if self.responses.is_empty() {
            return Err(TaskError::Other("MockBackend has no scripted responses".into()));
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        Ok(self.responses[idx].clone())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        Ok(LlmResponse {
            text: self.next_response(request)?,
            status: 200,
            metadata: None,
        })
    }

    async fn complete_streaming(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse> {
        let text = self.next_response(request)?;
        for ch in text.chars() {
            on_token(ch.to_string());
        }
        Ok(LlmResponse {
            text,
            status: 200,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
