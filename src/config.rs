//! Provider settings read from the environment.
//!
//! Credentials are never hard-coded. [`Settings::from_env`] reads the process
//! environment (after `.env` has been loaded by the binary via `dotenvy`);
//! [`Settings::from_lookup`] takes any key lookup so tests can inject values.
//! Missing credentials only surface as errors when the provider is used.

use crate::error::{Result, TaskError};
use std::time::Duration;

pub const QIANFAN_AK: &str = "QIANFAN_AK";
pub const QIANFAN_SK: &str = "QIANFAN_SK";
pub const QIANFAN_BASE_URL: &str = "QIANFAN_BASE_URL";
pub const MOONSHOT_API_KEY: &str = "MOONSHOT_API_KEY";
pub const MOONSHOT_BASE_URL: &str = "MOONSHOT_BASE_URL";
pub const TIMEOUT_SECS: &str = "LLM_TASKS_TIMEOUT_SECS";
pub const MAX_RETRIES: &str = "LLM_TASKS_MAX_RETRIES";

pub const DEFAULT_QIANFAN_BASE_URL: &str = "https://aip.baidubce.com";
pub const DEFAULT_MOONSHOT_BASE_URL: &str = "https://api.moonshot.cn";

/// Runtime settings shared by every task.
#[derive(Clone)]
pub struct Settings {
    pub qianfan: QianfanSettings,
    pub moonshot: MoonshotSettings,
    /// Per-request HTTP timeout. Default: 60 seconds.
    pub timeout: Duration,
    /// Transport retries on 429/5xx. Default: 0.
    pub max_retries: u32,
}

#[derive(Clone)]
pub struct QianfanSettings {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub base_url: String,
}

#[derive(Clone)]
pub struct MoonshotSettings {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout = match non_empty(TIMEOUT_SECS) {
            Some(raw) => Duration::from_secs(parse_number(TIMEOUT_SECS, &raw)?),
            None => Duration::from_secs(60),
        };
        let max_retries: u32 = match non_empty(MAX_RETRIES) {
            Some(raw) => parse_number(MAX_RETRIES, &raw)?,
            None => 0,
        };

        Ok(Self {
            qianfan: QianfanSettings {
                access_key: non_empty(QIANFAN_AK),
                secret_key: non_empty(QIANFAN_SK),
                base_url: non_empty(QIANFAN_BASE_URL)
                    .unwrap_or_else(|| DEFAULT_QIANFAN_BASE_URL.to_string()),
            },
            moonshot: MoonshotSettings {
                api_key: non_empty(MOONSHOT_API_KEY),
                base_url: non_empty(MOONSHOT_BASE_URL)
                    .unwrap_or_else(|| DEFAULT_MOONSHOT_BASE_URL.to_string()),
            },
            timeout,
            max_retries,
        })
    }
}

impl QianfanSettings {
    /// Return `(access_key, secret_key)` or the name of the first missing variable.
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let ak = self
            .access_key
            .as_deref()
            .ok_or(TaskError::MissingCredential(QIANFAN_AK))?;
        let sk = self
            .secret_key
            .as_deref()
            .ok_or(TaskError::MissingCredential(QIANFAN_SK))?;
        Ok((ak, sk))
    }
}

impl MoonshotSettings {
    pub fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or(TaskError::MissingCredential(MOONSHOT_API_KEY))
    }
}

/// Out-of-range values are rejected rather than wrapped.
fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        TaskError::InvalidConfig(format!(
            "{key} must be a non-negative integer in range, got '{raw}'"
        ))
    })
}

/// Show only a short prefix of a secret.
pub(crate) fn redact(secret: &Option<String>) -> Option<String> {
    secret.as_ref().map(|k| {
        if k.chars().count() > 6 {
            format!("{}***", k.chars().take(6).collect::<String>())
        } else {
            "***".to_string()
        }
    })
}

impl std::fmt::Debug for QianfanSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QianfanSettings")
            .field("access_key", &redact(&self.access_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl std::fmt::Debug for MoonshotSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoonshotSettings")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("qianfan", &self.qianfan)
            .field("moonshot", &self.moonshot)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.qianfan.base_url, DEFAULT_QIANFAN_BASE_URL);
        assert_eq!(settings.moonshot.base_url, DEFAULT_MOONSHOT_BASE_URL);
        assert_eq!(settings.timeout, Duration::from_secs(60));
        assert_eq!(settings.max_retries, 0);
    }

    #[test]
    fn missing_credentials_reported_on_use() {
        let settings = Settings::from_lookup(lookup(&[(QIANFAN_AK, "ak")])).unwrap();
        assert!(matches!(
            settings.qianfan.credentials(),
            Err(TaskError::MissingCredential(QIANFAN_SK))
        ));
        assert!(matches!(
            settings.moonshot.api_key(),
            Err(TaskError::MissingCredential(MOONSHOT_API_KEY))
        ));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let settings = Settings::from_lookup(lookup(&[(MOONSHOT_API_KEY, "  ")])).unwrap();
        assert!(settings.moonshot.api_key.is_none());
    }

    #[test]
    fn numeric_overrides_are_parsed() {
        let settings =
            Settings::from_lookup(lookup(&[(TIMEOUT_SECS, "120"), (MAX_RETRIES, "3")])).unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(120));
        assert_eq!(settings.max_retries, 3);
    }

    #[test]
    fn invalid_number_is_a_config_error() {
        let err = Settings::from_lookup(lookup(&[(TIMEOUT_SECS, "soon")])).unwrap_err();
        assert!(matches!(err, TaskError::InvalidConfig(_)));
    }

    #[test]
    fn retries_beyond_u32_are_rejected() {
        let err = Settings::from_lookup(lookup(&[(MAX_RETRIES, "4294967296")])).unwrap_err();
        assert!(matches!(err, TaskError::InvalidConfig(ref msg) if msg.contains(MAX_RETRIES)));

        let settings = Settings::from_lookup(lookup(&[(MAX_RETRIES, "4294967295")])).unwrap();
        assert_eq!(settings.max_retries, u32::MAX);
    }

    #[test]
    fn debug_redacts_secrets() {
        let settings = Settings::from_lookup(lookup(&[
            (MOONSHOT_API_KEY, "sk-1234567890abcdef"),
            (QIANFAN_SK, "secretsecretsecret"),
        ]))
        .unwrap();
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("1234567890abcdef"));
        assert!(!debug.contains("secretsecretsecret"));
        assert!(debug.contains("sk-123***"));
    }
}
