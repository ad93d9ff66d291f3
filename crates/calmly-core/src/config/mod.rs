//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config file.
//! Environment variables override whatever the file provides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_DB_PATH: &str = "CALMLY_DB_PATH";
pub const ENV_API_URL: &str = "CALMLY_API_URL";
pub const ENV_SYNC_INTERVAL_SECS: &str = "CALMLY_SYNC_INTERVAL_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "CALMLY_MAX_ATTEMPTS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "CALMLY_REQUEST_TIMEOUT_SECS";

/// Exponential backoff schedule for retryable push failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
    /// Attempts allowed before an entry is dead-lettered
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2,
            max_delay_ms: 5 * 60 * 1_000,
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// `base * multiplier^(failures - 1)`, capped at `max_delay_ms`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = u64::from(self.multiplier).saturating_pow(exponent);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Whether an entry that has now failed `failures` times is out of budget
    pub const fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

/// Runtime configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Local database file; callers pick a platform default when unset
    pub db_path: Option<PathBuf>,
    /// Backend base URL; sync is disabled when unset
    pub api_url: Option<String>,
    pub sync_interval_secs: u64,
    pub push_batch_size: usize,
    pub pull_page_size: usize,
    pub max_pull_pages: usize,
    pub request_timeout_secs: u64,
    /// How long connectivity must hold before it counts as online
    pub stability_window_ms: u64,
    /// Interval of the backend health probe; 0 disables it
    pub probe_interval_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            api_url: None,
            sync_interval_secs: 60,
            push_batch_size: 50,
            pull_page_size: 100,
            max_pull_pages: 20,
            request_timeout_secs: 15,
            stability_window_ms: 2_000,
            probe_interval_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|error| Error::Config(format!("{}: {error}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn with_env(self) -> Result<Self> {
        let values: HashMap<String, String> = std::env::vars().collect();
        self.with_lookup(|name| values.get(name).cloned())
    }

    /// Apply overrides from any variable source
    pub fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| normalize_text_option(lookup(name));

        if let Some(path) = get(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(url) = get(ENV_API_URL) {
            self.api_url = Some(url);
        }
        if let Some(value) = get(ENV_SYNC_INTERVAL_SECS) {
            self.sync_interval_secs = parse_number(ENV_SYNC_INTERVAL_SECS, &value)?;
        }
        if let Some(value) = get(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = parse_number(ENV_MAX_ATTEMPTS, &value)?;
        }
        if let Some(value) = get(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = parse_number(ENV_REQUEST_TIMEOUT_SECS, &value)?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_url {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "api_url must start with http:// or https://".to_string(),
                ));
            }
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::Config("sync_interval_secs must be > 0".to_string()));
        }
        if self.push_batch_size == 0 || self.pull_page_size == 0 || self.max_pull_pages == 0 {
            return Err(Error::Config(
                "batch size, page size and max pages must be > 0".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be > 0".to_string()));
        }
        if self.retry.max_attempts == 0 || self.retry.multiplier == 0 {
            return Err(Error::Config(
                "retry.max_attempts and retry.multiplier must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub const fn probe_interval(&self) -> Option<Duration> {
        if self.probe_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.probe_interval_secs))
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| policy.delay_for(n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(policy.delay_for(30), Duration::from_secs(300));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn exhaustion_uses_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    #[test]
    fn empty_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calmly.json");
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(EngineConfig::load_from_path(&path).unwrap(), EngineConfig::default());
    }

    #[test]
    fn file_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calmly.json");
        std::fs::write(&path, r#"{ "sync_every": 5 }"#).unwrap();
        let error = EngineConfig::load_from_path(&path).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn lookup_overrides_file_values() {
        let mut map = HashMap::new();
        map.insert(ENV_API_URL, " http://127.0.0.1:8080 ");
        map.insert(ENV_SYNC_INTERVAL_SECS, "5");
        map.insert(ENV_MAX_ATTEMPTS, "3");

        let config = EngineConfig::default()
            .with_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap();
        assert_eq!(config.api_url.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(config.sync_interval(), Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn lookup_rejects_bad_values() {
        let mut map = HashMap::new();
        map.insert(ENV_MAX_ATTEMPTS, "many");
        let error = EngineConfig::default()
            .with_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(error.to_string().contains(ENV_MAX_ATTEMPTS));

        let mut map = HashMap::new();
        map.insert(ENV_API_URL, "ftp://nope");
        assert!(EngineConfig::default()
            .with_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .is_err());
    }
}
