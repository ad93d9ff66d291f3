use std::collections::HashMap;
use std::env;
use std::ops::RangeInclusive;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Largest accepted push body, in operations
    pub max_push_batch: usize,
    /// Upper bound applied to the `limit` query parameter of a pull
    pub max_page_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "CALMLY_API_BIND_ADDR", "127.0.0.1:8080");
        let max_push_batch = bounded(&lookup, "CALMLY_API_MAX_PUSH_BATCH", 200, 1..=1_000)?;
        let max_page_size = bounded(&lookup, "CALMLY_API_MAX_PAGE_SIZE", 500, 1..=5_000)?;

        Ok(Self {
            bind_addr,
            max_push_batch,
            max_page_size,
        })
    }
}

fn bounded(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: usize,
    range: RangeInclusive<usize>,
) -> Result<usize, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<usize>().map_err(|_| invalid())?,
        None => default,
    };
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        assert_eq!(
            config_from(&[]).unwrap(),
            AppConfig {
                bind_addr: "127.0.0.1:8080".to_string(),
                max_push_batch: 200,
                max_page_size: 500,
            }
        );
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("CALMLY_API_BIND_ADDR", "  0.0.0.0:9000 "),
            ("CALMLY_API_MAX_PAGE_SIZE", "   "),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.max_page_size, 500);
    }

    #[test]
    fn limits_outside_range_are_rejected() {
        let err = config_from(&[("CALMLY_API_MAX_PUSH_BATCH", "0")]).unwrap_err();
        assert!(err.to_string().contains("CALMLY_API_MAX_PUSH_BATCH"));

        let err = config_from(&[("CALMLY_API_MAX_PAGE_SIZE", "lots")]).unwrap_err();
        assert!(err.to_string().contains("[1, 5000]"));
    }
}
