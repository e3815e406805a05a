//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.retries.max_attempts, 3);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.rate_limit.idle_timeout_secs, 300);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_full_file() {
        let content = r#"
            [rate_limit]
            rate_per_minute = 60
            burst = 5

            [[rate_limit.overrides]]
            path_prefix = "/auth"
            rate_per_minute = 10
            burst = 2

            [circuit_breaker]
            max_half_open_probes = 1
            failure_rate_threshold = 0.25

            [retries]
            max_attempts = 4
            jitter = false

            [observability]
            log_format = "json"

            [[services]]
            name = "orders"
            addresses = ["127.0.0.1:3000", "127.0.0.1:3001"]

            [[routes]]
            path_prefix = "/svc"
            service = "orders"
            strip_prefix = true
            rate_limit = { rate_per_minute = 30, burst = 3 }
        "#;

        let config = parse_config(content).unwrap();
        assert_eq!(config.rate_limit.overrides.len(), 1);
        assert_eq!(config.circuit_breaker.max_half_open_probes, 1);
        assert_eq!(config.retries.max_attempts, 4);
        assert!(!config.retries.jitter);
        assert_eq!(config.services[0].addresses.len(), 2);
        assert!(config.routes[0].strip_prefix);
        assert_eq!(config.routes[0].rate_limit.unwrap().burst, 3);
        assert_eq!(
            config.observability.log_format,
            crate::config::schema::LogFormat::Json
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = parse_config("[retries]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("retries.max_attempts"));
    }

    #[test]
    fn test_syntax_error() {
        let err = parse_config("[retries\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
