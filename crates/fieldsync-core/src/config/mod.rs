//! Engine configuration.
//!
//! `EngineConfig` is read from a JSON file and then overridden by
//! `FIELDSYNC_*` environment variables. Without an API base URL the engine
//! runs local-only: it stays offline and queues every write.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{http_base_url, normalize_text_option};

pub const ENV_API_URL: &str = "FIELDSYNC_API_URL";
pub const ENV_API_TOKEN: &str = "FIELDSYNC_API_TOKEN";
pub const ENV_SYNC_INTERVAL_SECS: &str = "FIELDSYNC_SYNC_INTERVAL_SECS";

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub sync_interval_secs: u64,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    /// Ping the remote on each tick while offline to detect recovery
    pub probe_when_offline: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            probe_when_offline: true,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EngineConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("max_retries", &self.max_retries)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("probe_when_offline", &self.probe_when_offline)
            .finish()
    }
}

impl EngineConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(error.into()),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|error| Error::Config(format!("invalid config: {error}")))
    }

    /// Apply `FIELDSYNC_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, then validate.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_API_TOKEN)) {
            self.api_token = Some(token);
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_SYNC_INTERVAL_SECS)) {
            self.sync_interval_secs = raw.parse().map_err(|_| {
                Error::Config(format!("{ENV_SYNC_INTERVAL_SECS} must be a number, got '{raw}'"))
            })?;
        }
        self.validate()
    }

    pub fn validate(mut self) -> Result<Self> {
        self.api_base_url = match normalize_text_option(self.api_base_url.take()) {
            Some(url) => Some(http_base_url(&url).ok_or_else(|| {
                Error::Config("api_base_url must include http:// or https://".to_string())
            })?),
            None => None,
        };
        self.api_token = normalize_text_option(self.api_token.take());

        if self.sync_interval_secs == 0 {
            return Err(Error::Config("sync_interval_secs must be positive".to_string()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".to_string()));
        }
        Ok(self)
    }

    pub const fn is_local_only(&self) -> bool {
        self.api_base_url.is_none()
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_local_only() {
        let config = EngineConfig::default();
        assert!(config.is_local_only());
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
        assert!(config.probe_when_offline);
    }

    #[test]
    fn parse_fills_missing_fields_with_defaults() {
        let config =
            EngineConfig::parse(r#"{"api_base_url":"https://api.example.com"}"#).unwrap();
        assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.request_timeout_secs, 15);
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let error = EngineConfig::parse(r#"{"unexpected":true}"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn env_overrides_win_over_file() {
        let config = EngineConfig::default()
            .with_overrides(lookup(&[
                (ENV_API_URL, "https://api.example.com/"),
                (ENV_API_TOKEN, "token"),
                (ENV_SYNC_INTERVAL_SECS, "5"),
            ]))
            .unwrap();
        assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.api_token.as_deref(), Some("token"));
        assert_eq!(config.sync_interval_secs, 5);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(EngineConfig::default()
            .with_overrides(lookup(&[(ENV_API_URL, "api.example.com")]))
            .is_err());
        assert!(EngineConfig::default()
            .with_overrides(lookup(&[(ENV_SYNC_INTERVAL_SECS, "soon")]))
            .is_err());
        let zero_retries = EngineConfig {
            max_retries: 0,
            ..EngineConfig::default()
        };
        assert!(zero_retries.validate().is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let config = EngineConfig {
            api_token: Some("secret".to_string()),
            ..EngineConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
