//! Core rate limiter: the per-request decision pipeline.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::bucket::TokenBucket;
use super::cleanup::CleanupScheduler;
use super::decision::{DenialReason, Outcome, Quota, RateLimitDecision, RequestIdentity, Scope};
use super::matcher::EndpointMatcher;
use super::registry::{Registries, SweepReport};
use super::rules::{LimitSpec, RateLimitConfig};
use crate::error::Result;

/// Rules together with the matcher derived from them, swapped as one unit.
#[derive(Debug)]
struct ActiveConfig {
    rules: RateLimitConfig,
    matcher: EndpointMatcher,
}

impl ActiveConfig {
    fn new(rules: RateLimitConfig) -> Self {
        let matcher = EndpointMatcher::new(&rules.endpoint_limits);
        Self { rules, matcher }
    }
}

/// Number of live buckets per registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    /// Endpoint patterns with at least one bucket
    pub endpoint_patterns: usize,
    /// Buckets across all endpoint patterns
    pub endpoint_limiters: usize,
    pub ip_limiters: usize,
    pub user_limiters: usize,
}

/// Throttles requests per endpoint, per client IP and per user.
///
/// This struct is thread-safe and is meant to be shared behind an `Arc`
/// across every request-handling task.
pub struct RateLimiter {
    /// Installed rules; held for reading for the whole of each check
    active: RwLock<ActiveConfig>,
    registries: Arc<Registries>,
    cleanup: Mutex<Option<CleanupScheduler>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("stats", &self.stats())
            .field("cleanup_running", &self.cleanup.lock().is_some())
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter enforcing `config`.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        info!(
            endpoints = config.endpoint_limits.len(),
            ip_limits = config.ip_limits.is_some(),
            user_limits = config.user_limits.is_some(),
            excluded_ips = config.excluded_ips.len(),
            "Installing rate limit rules"
        );

        Ok(Self {
            active: RwLock::new(ActiveConfig::new(config)),
            registries: Arc::new(Registries::new()),
            cleanup: Mutex::new(None),
        })
    }

    /// Create a rate limiter with no limits configured.
    pub fn unlimited() -> Self {
        Self {
            active: RwLock::new(ActiveConfig::new(RateLimitConfig::new())),
            registries: Arc::new(Registries::new()),
            cleanup: Mutex::new(None),
        }
    }

    /// Evaluate one request.
    ///
    /// Checks run in order endpoint, IP, user and stop at the first denial.
    /// Each check that runs consumes a token from its bucket and contributes
    /// a [`Quota`] to the decision.
    pub fn check(&self, identity: &RequestIdentity<'_>) -> RateLimitDecision {
        let active = self.active.read();
        let client_ip = identity.client_ip;

        trace!(
            path = identity.path,
            client_ip = client_ip,
            user_id = ?identity.user_id,
            "Checking rate limits"
        );

        if active.rules.is_excluded(client_ip) {
            trace!(client_ip = client_ip, "Client IP excluded from rate limiting");
            return RateLimitDecision::excluded();
        }

        let now = Utc::now().timestamp();
        let mut quotas = Vec::with_capacity(3);

        if let Some(pattern) = active.matcher.find(identity.path) {
            if let Some(limit) = active.rules.endpoint_limits.get(pattern) {
                let spec = limit.spec();
                let bucket = self.registries.endpoint.get_or_create(pattern, client_ip, &spec);
                if !admit(&bucket, Scope::Endpoint, &spec, now, &mut quotas) {
                    debug!(
                        pattern = pattern,
                        client_ip = client_ip,
                        limit = spec.rate,
                        "Endpoint rate limit exceeded"
                    );
                    return denied(DenialReason::EndpointExceeded, quotas);
                }
            }
        }

        if let Some(ip_limits) = &active.rules.ip_limits {
            let spec = ip_limits.spec();
            let bucket = self.registries.ip.get_or_create(client_ip, &spec);
            if !admit(&bucket, Scope::Ip, &spec, now, &mut quotas) {
                debug!(client_ip = client_ip, limit = spec.rate, "IP rate limit exceeded");
                return denied(DenialReason::IpExceeded, quotas);
            }
        }

        if let (Some(user_id), Some(user_limits)) = (identity.user_id, &active.rules.user_limits) {
            let spec = user_limits.spec();
            let bucket = self.registries.user.get_or_create(&user_id, &spec);
            if !admit(&bucket, Scope::User, &spec, now, &mut quotas) {
                debug!(user_id = user_id, limit = spec.rate, "User rate limit exceeded");
                return denied(DenialReason::UserExceeded, quotas);
            }
        }

        RateLimitDecision {
            outcome: Outcome::Allowed,
            quotas,
        }
    }

    /// Replace the installed rules.
    ///
    /// The new rules are validated first; on error the running rules stay in
    /// place. On success every bucket is dropped while still holding the
    /// exclusive lock, so no check sees a bucket built from superseded rules.
    pub fn update_config(&self, config: RateLimitConfig) -> Result<()> {
        config.validate()?;
        let next = ActiveConfig::new(config);

        let mut active = self.active.write();
        *active = next;
        self.registries.clear();

        info!(
            endpoints = active.rules.endpoint_limits.len(),
            ip_limits = active.rules.ip_limits.is_some(),
            user_limits = active.rules.user_limits.is_some(),
            excluded_ips = active.rules.excluded_ips.len(),
            "Rate limit rules updated"
        );
        Ok(())
    }

    /// Get a copy of the installed rules.
    pub fn config(&self) -> RateLimitConfig {
        self.active.read().rules.clone()
    }

    /// Get the current bucket counts.
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            endpoint_patterns: self.registries.endpoint.pattern_count(),
            endpoint_limiters: self.registries.endpoint.len(),
            ip_limiters: self.registries.ip.len(),
            user_limiters: self.registries.user.len(),
        }
    }

    /// Number of buckets held for a single endpoint pattern.
    pub fn endpoint_limiter_count(&self, pattern: &str) -> usize {
        self.registries.endpoint.limiter_count(pattern)
    }

    /// Run one eviction pass over all registries.
    pub fn sweep(&self, threshold: usize) -> SweepReport {
        self.registries.sweep(threshold)
    }

    /// Drop every bucket.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.registries.clear();
    }

    /// Start the periodic sweep on the current tokio runtime.
    ///
    /// A scheduler that is already running is stopped and replaced. A zero
    /// interval is rejected and leaves any running scheduler in place.
    pub fn start_cleanup(&self, interval: Duration, threshold: usize) -> Result<()> {
        let scheduler = CleanupScheduler::spawn(Arc::clone(&self.registries), interval, threshold)?;
        if let Some(previous) = self.cleanup.lock().replace(scheduler) {
            previous.stop();
        }
        Ok(())
    }

    /// Stop the periodic sweep. Does nothing if none is running.
    pub fn stop(&self) {
        if let Some(scheduler) = self.cleanup.lock().take() {
            scheduler.stop();
        }
    }

    /// Whether a periodic sweep is currently scheduled.
    pub fn cleanup_running(&self) -> bool {
        self.cleanup.lock().as_ref().map_or(false, |s| !s.is_stopped())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Take a token and record the resulting quota.
fn admit(
    bucket: &TokenBucket,
    scope: Scope,
    spec: &LimitSpec,
    now: i64,
    quotas: &mut Vec<Quota>,
) -> bool {
    let (admitted, remaining) = bucket.acquire();
    quotas.push(Quota {
        scope,
        limit: spec.rate,
        remaining,
        reset: now.saturating_add(spec.window.as_secs() as i64),
    });
    admitted
}

fn denied(reason: DenialReason, quotas: Vec<Quota>) -> RateLimitDecision {
    RateLimitDecision {
        outcome: Outcome::Denied(reason),
        quotas,
    }
}
