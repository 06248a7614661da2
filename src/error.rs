use std::time::Duration;
use thiserror::Error;

/// Errors produced by model calls, parsers and task runners.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON encoding or decoding failed at the serde level.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading the input document or appending to the dataset failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-success HTTP status from the provider.
    ///
    /// `retry_after` is populated from the `Retry-After` header when present.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// The provider answered with an application-level error payload
    /// (Qianfan reports these as HTTP 200 with `error_code`/`error_msg`).
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    /// A credential environment variable was not set.
    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),

    /// A prompt template referenced a variable the caller did not supply.
    #[error("prompt variable '{0}' was not provided")]
    MissingVariable(String),

    /// Model output could not be parsed into the expected shape.
    #[error("could not parse {expected} from model output: {text}")]
    Parse {
        expected: &'static str,
        /// Truncated copy of the offending text.
        text: String,
    },

    /// Invalid configuration detected before any call was made.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// Truncate to at most `max_chars` characters, appending "..." when cut.
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("张华获得了诺贝尔奖", 2), "张华...");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn provider_error_display() {
        let err = TaskError::Provider {
            code: 18,
            message: "Open api qps request limit reached".into(),
        };
        assert_eq!(
            err.to_string(),
            "provider error 18: Open api qps request limit reached"
        );
    }
}
