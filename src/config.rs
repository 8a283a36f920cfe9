//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_SWEEP_THRESHOLD};

/// Prefix for environment variable overrides, e.g. `TURNSTILE__SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the rate limit rules file
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Seconds between registry sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Key count above which a sweep clears a registry
    #[serde(default = "default_sweep_threshold")]
    pub sweep_threshold: usize,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            cleanup_interval_secs: default_cleanup_interval(),
            sweep_threshold: default_sweep_threshold(),
        }
    }
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL.as_secs()
}

fn default_sweep_threshold() -> usize {
    DEFAULT_SWEEP_THRESHOLD
}

impl RateLimitingConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl ServiceConfig {
    /// Load configuration from an optional file, then environment overrides.
    ///
    /// The file format is inferred from its extension.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config: ServiceConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the cleanup scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.cleanup_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.cleanup_interval_secs must be > 0".to_string(),
            ));
        }
        if self.rate_limiting.sweep_threshold == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.sweep_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.rate_limiting.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(config.rate_limiting.sweep_threshold, 1000);
        assert!(config.rate_limiting.rules_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ServiceConfig = serde_yaml::from_str(
            r#"
rate_limiting:
  rules_path: /etc/turnstile/rules.yaml
  sweep_threshold: 50
"#,
        )
        .unwrap();

        assert_eq!(config.rate_limiting.rules_path.as_deref(), Some("/etc/turnstile/rules.yaml"));
        assert_eq!(config.rate_limiting.sweep_threshold, 50);
        assert_eq!(config.rate_limiting.cleanup_interval_secs, 300);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("turnstile-config-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "server:\n  listen_addr: \"0.0.0.0:9000\"\nrate_limiting:\n  cleanup_interval_secs: 30").unwrap();

        let config = ServiceConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.server.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.rate_limiting.cleanup_interval_secs, 30);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = ServiceConfig::load(Some("/nonexistent/turnstile.yaml")).unwrap_err();
        assert!(matches!(err, TurnstileError::ConfigSource(_)));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = ServiceConfig::default();
        config.rate_limiting.cleanup_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.rate_limiting.sweep_threshold = 0;
        assert!(config.validate().is_err());
    }
}
