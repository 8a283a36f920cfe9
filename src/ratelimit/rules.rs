//! Rate limit rules configuration.
//!
//! Rules describe the three independent throttling dimensions: per-endpoint
//! limits keyed by path pattern, a single per-client-IP limit and a single
//! per-user limit, plus a set of client IPs exempt from all of them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::bucket::{RateUnit, TokenBucket};
use crate::error::{Result, TurnstileError};

/// The complete set of rate limit rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Map of endpoint pattern to its limit
    #[serde(default)]
    pub endpoint_limits: HashMap<String, EndpointLimit>,
    /// Limit applied to every client IP
    #[serde(default)]
    pub ip_limits: Option<IpLimitConfig>,
    /// Limit applied to every authenticated user
    #[serde(default)]
    pub user_limits: Option<UserLimitConfig>,
    /// Client IPs exempt from all checks
    #[serde(default)]
    pub excluded_ips: HashSet<String>,
}

/// Per-endpoint limit, expressed in requests per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimit {
    pub requests_per_second: u32,
    pub burst_size: u32,
    /// Seconds added to "now" when reporting the reset timestamp
    #[serde(default = "default_endpoint_window")]
    pub window_secs: u64,
}

/// Per-client-IP limit, expressed in requests per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
    #[serde(default = "default_minute_window")]
    pub window_secs: u64,
}

/// Per-user limit, expressed in requests per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
    #[serde(default = "default_minute_window")]
    pub window_secs: u64,
}

fn default_endpoint_window() -> u64 {
    1
}

fn default_minute_window() -> u64 {
    60
}

/// The parameters every limit kind reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSpec {
    /// Configured rate, reported as the limit header
    pub rate: u32,
    pub unit: RateUnit,
    pub burst: u32,
    pub window: Duration,
}

impl LimitSpec {
    /// Build a full bucket for this limit.
    pub fn bucket(&self) -> TokenBucket {
        TokenBucket::with_rate(self.rate, self.unit, self.burst)
    }

    fn validate(&self, what: &str) -> Result<()> {
        let per = match self.unit {
            RateUnit::Second => "requests_per_second",
            RateUnit::Minute => "requests_per_minute",
        };
        if self.rate == 0 {
            return Err(TurnstileError::Config(format!("{}: {} must be > 0", what, per)));
        }
        if self.burst == 0 {
            return Err(TurnstileError::Config(format!("{}: burst_size must be >= 1", what)));
        }
        if self.window.is_zero() {
            return Err(TurnstileError::Config(format!("{}: window_secs must be > 0", what)));
        }
        Ok(())
    }
}

impl EndpointLimit {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
            window_secs: default_endpoint_window(),
        }
    }

    pub fn spec(&self) -> LimitSpec {
        LimitSpec {
            rate: self.requests_per_second,
            unit: RateUnit::Second,
            burst: self.burst_size,
            window: Duration::from_secs(self.window_secs),
        }
    }
}

impl IpLimitConfig {
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            requests_per_minute,
            burst_size,
            window_secs: default_minute_window(),
        }
    }

    pub fn spec(&self) -> LimitSpec {
        LimitSpec {
            rate: self.requests_per_minute,
            unit: RateUnit::Minute,
            burst: self.burst_size,
            window: Duration::from_secs(self.window_secs),
        }
    }
}

impl UserLimitConfig {
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            requests_per_minute,
            burst_size,
            window_secs: default_minute_window(),
        }
    }

    pub fn spec(&self) -> LimitSpec {
        LimitSpec {
            rate: self.requests_per_minute,
            unit: RateUnit::Minute,
            burst: self.burst_size,
            window: Duration::from_secs(self.window_secs),
        }
    }
}

impl RateLimitConfig {
    /// Create an empty configuration (no limits at all).
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document means "no limits"
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }

        let config: RateLimitConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Add an endpoint limit.
    pub fn with_endpoint(mut self, pattern: impl Into<String>, limit: EndpointLimit) -> Self {
        self.endpoint_limits.insert(pattern.into(), limit);
        self
    }

    /// Set the per-IP limit.
    pub fn with_ip_limits(mut self, limits: IpLimitConfig) -> Self {
        self.ip_limits = Some(limits);
        self
    }

    /// Set the per-user limit.
    pub fn with_user_limits(mut self, limits: UserLimitConfig) -> Self {
        self.user_limits = Some(limits);
        self
    }

    /// Exempt a client IP from all checks.
    pub fn with_excluded_ip(mut self, ip: impl Into<String>) -> Self {
        self.excluded_ips.insert(ip.into());
        self
    }

    /// Reject configurations that would make a refill rate undefined.
    pub fn validate(&self) -> Result<()> {
        for (pattern, limit) in &self.endpoint_limits {
            if pattern.is_empty() || !pattern.starts_with('/') {
                return Err(TurnstileError::Config(format!(
                    "endpoint pattern '{}' must start with '/'",
                    pattern
                )));
            }
            limit.spec().validate(&format!("endpoint_limits['{}']", pattern))?;
        }

        if let Some(ip) = &self.ip_limits {
            ip.spec().validate("ip_limits")?;
        }

        if let Some(user) = &self.user_limits {
            user.spec().validate("user_limits")?;
        }

        if self.excluded_ips.iter().any(|ip| ip.trim().is_empty()) {
            return Err(TurnstileError::Config(
                "excluded_ips must not contain blank entries".to_string(),
            ));
        }

        Ok(())
    }

    /// Check whether a client IP is exempt.
    pub fn is_excluded(&self, client_ip: &str) -> bool {
        self.excluded_ips.contains(client_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
endpoint_limits:
  /api/v1/auth/login:
    requests_per_second: 5
    burst_size: 10
  /api/v1/tournaments/:
    requests_per_second: 20
    burst_size: 40
    window_secs: 2
ip_limits:
  requests_per_minute: 100
  burst_size: 20
user_limits:
  requests_per_minute: 300
  burst_size: 50
  window_secs: 120
excluded_ips:
  - 127.0.0.1
  - "::1"
"#;
        let config = RateLimitConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.endpoint_limits.len(), 2);
        let login = config.endpoint_limits["/api/v1/auth/login"];
        assert_eq!(login.requests_per_second, 5);
        assert_eq!(login.burst_size, 10);
        assert_eq!(login.window_secs, 1);
        assert_eq!(config.endpoint_limits["/api/v1/tournaments/"].window_secs, 2);

        let ip = config.ip_limits.unwrap();
        assert_eq!(ip.requests_per_minute, 100);
        assert_eq!(ip.window_secs, 60);

        let user = config.user_limits.unwrap();
        assert_eq!(user.window_secs, 120);

        assert!(config.is_excluded("127.0.0.1"));
        assert!(config.is_excluded("::1"));
        assert!(!config.is_excluded("10.0.0.1"));
    }

    #[test]
    fn test_empty_document_is_no_limits() {
        let config = RateLimitConfig::from_yaml("   \n").unwrap();
        assert_eq!(config, RateLimitConfig::new());
    }

    #[test]
    fn test_reject_zero_rate() {
        let yaml = r#"
endpoint_limits:
  /login:
    requests_per_second: 0
    burst_size: 10
"#;
        let err = RateLimitConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
        assert!(err.to_string().contains("requests_per_second"));
    }

    #[test]
    fn test_reject_zero_burst() {
        let config = RateLimitConfig::new().with_ip_limits(IpLimitConfig::new(10, 0));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("burst_size"));
    }

    #[test]
    fn test_reject_zero_user_rate() {
        let config = RateLimitConfig::new().with_user_limits(UserLimitConfig::new(0, 5));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requests_per_minute"));
    }

    #[test]
    fn test_reject_zero_window() {
        let mut limit = EndpointLimit::new(5, 5);
        limit.window_secs = 0;
        let config = RateLimitConfig::new().with_endpoint("/login", limit);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_relative_pattern() {
        let config = RateLimitConfig::new().with_endpoint("login", EndpointLimit::new(5, 5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_blank_excluded_ip() {
        let config = RateLimitConfig::new().with_excluded_ip("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_malformed_yaml() {
        let err = RateLimitConfig::from_yaml("endpoint_limits: [1, 2").unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_limit_spec_conversion() {
        let spec = EndpointLimit::new(2, 3).spec();
        assert_eq!(spec.unit, RateUnit::Second);
        assert_eq!(spec.window, Duration::from_secs(1));

        let bucket = spec.bucket();
        assert_eq!(bucket.capacity(), 3);
        assert_eq!(bucket.refill_interval(), Duration::from_millis(500));

        let spec = IpLimitConfig::new(30, 5).spec();
        assert_eq!(spec.unit, RateUnit::Minute);
        assert_eq!(spec.bucket().refill_interval(), Duration::from_secs(2));
    }
}
