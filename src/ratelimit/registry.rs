//! Keyed storage of token buckets.
//!
//! Each registry maps a scope key to its bucket behind a single reader-writer
//! lock. Buckets are created lazily on first use and only ever removed in
//! bulk by a sweep.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::bucket::TokenBucket;
use super::rules::LimitSpec;

/// Default key count above which a sweep clears a registry.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 1000;

/// Buckets for one scope, keyed by `K`.
#[derive(Debug)]
pub struct LimiterRegistry<K> {
    limiters: RwLock<HashMap<K, Arc<TokenBucket>>>,
    /// Buckets constructed over the registry's lifetime
    created: AtomicU64,
}

impl<K> LimiterRegistry<K>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            created: AtomicU64::new(0),
        }
    }

    /// Get the bucket for `key`, creating a full one from `spec` if absent.
    ///
    /// At most one bucket is ever constructed per key, even when several
    /// callers miss on the same key at once.
    pub fn get_or_create<Q>(&self, key: &Q, spec: &LimitSpec) -> Arc<TokenBucket>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(bucket) = self.limiters.read().get(key) {
            return Arc::clone(bucket);
        }

        let mut limiters = self.limiters.write();
        // Another caller may have created it between the two locks
        if let Some(bucket) = limiters.get(key) {
            return Arc::clone(bucket);
        }

        debug!(
            rate = spec.rate,
            unit = ?spec.unit,
            burst = spec.burst,
            "Creating new token bucket"
        );
        let bucket = Arc::new(spec.bucket());
        limiters.insert(key.to_owned(), Arc::clone(&bucket));
        self.created.fetch_add(1, Ordering::Relaxed);
        bucket
    }

    /// Look up an existing bucket without creating one.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<TokenBucket>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.limiters.read().get(key).cloned()
    }

    /// Clear the whole registry if it holds more than `threshold` keys.
    ///
    /// Returns the number of buckets dropped.
    pub fn sweep(&self, threshold: usize) -> usize {
        if self.len() <= threshold {
            return 0;
        }

        let mut limiters = self.limiters.write();
        // Re-check under the exclusive lock
        let count = limiters.len();
        if count <= threshold {
            return 0;
        }
        limiters.clear();
        count
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.limiters.write().clear();
    }

    /// Get the number of live buckets.
    pub fn len(&self) -> usize {
        self.limiters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total buckets ever constructed by this registry.
    pub fn created_total(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl<K: Eq + Hash> Default for LimiterRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-level registry: endpoint pattern, then client IP.
///
/// Every pattern owns an independent inner registry with its own lock, and
/// the sweep threshold applies to each inner registry separately.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<String, Arc<LimiterRegistry<String>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the bucket for `(pattern, client_ip)`, creating it from `spec` if absent.
    pub fn get_or_create(&self, pattern: &str, client_ip: &str, spec: &LimitSpec) -> Arc<TokenBucket> {
        self.inner(pattern).get_or_create(client_ip, spec)
    }

    /// Look up an existing bucket without creating one.
    pub fn get(&self, pattern: &str, client_ip: &str) -> Option<Arc<TokenBucket>> {
        self.endpoints.get(pattern)?.get(client_ip)
    }

    fn inner(&self, pattern: &str) -> Arc<LimiterRegistry<String>> {
        if let Some(inner) = self.endpoints.get(pattern) {
            return Arc::clone(inner.value());
        }
        // The shard guard is dropped at the end of this statement
        Arc::clone(
            self.endpoints
                .entry(pattern.to_string())
                .or_insert_with(|| Arc::new(LimiterRegistry::new()))
                .value(),
        )
    }

    /// Sweep each pattern's inner registry against `threshold`.
    pub fn sweep(&self, threshold: usize) -> usize {
        self.endpoints
            .iter()
            .map(|entry| entry.value().sweep(threshold))
            .sum()
    }

    /// Drop every bucket for every pattern.
    pub fn clear(&self) {
        self.endpoints.clear();
    }

    /// Number of buckets across all patterns.
    pub fn len(&self) -> usize {
        self.endpoints.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of patterns that have seen traffic since the last clear.
    pub fn pattern_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Number of buckets held for a single pattern.
    pub fn limiter_count(&self, pattern: &str) -> usize {
        self.endpoints.get(pattern).map_or(0, |inner| inner.len())
    }
}

/// Buckets dropped by one sweep, per registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub endpoint_cleared: usize,
    pub ip_cleared: usize,
    pub user_cleared: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.endpoint_cleared + self.ip_cleared + self.user_cleared
    }
}

/// The three independent registries consulted per request.
#[derive(Debug, Default)]
pub struct Registries {
    pub endpoint: EndpointRegistry,
    pub ip: LimiterRegistry<String>,
    pub user: LimiterRegistry<u64>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sweep(&self, threshold: usize) -> SweepReport {
        SweepReport {
            endpoint_cleared: self.endpoint.sweep(threshold),
            ip_cleared: self.ip.sweep(threshold),
            user_cleared: self.user.sweep(threshold),
        }
    }

    pub fn clear(&self) {
        self.endpoint.clear();
        self.ip.clear();
        self.user.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::{EndpointLimit, IpLimitConfig};

    fn ip_spec(burst: u32) -> LimitSpec {
        IpLimitConfig::new(60, burst).spec()
    }

    #[test]
    fn test_get_or_create_reuses_bucket() {
        let registry: LimiterRegistry<String> = LimiterRegistry::new();
        let spec = ip_spec(5);

        let a = registry.get_or_create("10.0.0.1", &spec);
        let b = registry.get_or_create("10.0.0.1", &spec);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.created_total(), 1);
    }

    #[test]
    fn test_concurrent_first_access_creates_once() {
        let registry: LimiterRegistry<String> = LimiterRegistry::new();
        let spec = ip_spec(1000);

        let buckets: Vec<Arc<TokenBucket>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| registry.get_or_create("192.0.2.7", &spec)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.created_total(), 1);
        assert!(buckets.iter().all(|b| Arc::ptr_eq(b, &buckets[0])));
    }

    #[test]
    fn test_keys_are_isolated() {
        let registry: LimiterRegistry<u64> = LimiterRegistry::new();
        let spec = ip_spec(1);

        assert!(registry.get_or_create(&1u64, &spec).try_acquire());
        assert!(!registry.get_or_create(&1u64, &spec).try_acquire());
        assert!(registry.get_or_create(&2u64, &spec).try_acquire());
    }

    #[test]
    fn test_sweep_below_threshold_keeps_state() {
        let registry: LimiterRegistry<String> = LimiterRegistry::new();
        let spec = ip_spec(5);
        for i in 0..3 {
            registry.get_or_create(format!("10.0.0.{}", i).as_str(), &spec);
        }

        assert_eq!(registry.sweep(3), 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_sweep_above_threshold_clears_and_resets() {
        let registry: LimiterRegistry<String> = LimiterRegistry::new();
        let spec = ip_spec(1);

        assert!(registry.get_or_create("10.0.0.0", &spec).try_acquire());
        assert!(!registry.get_or_create("10.0.0.0", &spec).try_acquire());
        for i in 1..5 {
            registry.get_or_create(format!("10.0.0.{}", i).as_str(), &spec);
        }

        assert_eq!(registry.sweep(3), 5);
        assert!(registry.is_empty());

        // A previously exhausted key gets a fresh full bucket
        assert!(registry.get_or_create("10.0.0.0", &spec).try_acquire());
    }

    #[test]
    fn test_endpoint_registry_is_two_level() {
        let registry = EndpointRegistry::new();
        let spec = EndpointLimit::new(1, 1).spec();

        assert!(registry.get_or_create("/login", "10.0.0.1", &spec).try_acquire());
        assert!(!registry.get_or_create("/login", "10.0.0.1", &spec).try_acquire());
        assert!(registry.get_or_create("/login", "10.0.0.2", &spec).try_acquire());
        assert!(registry.get_or_create("/signup", "10.0.0.1", &spec).try_acquire());

        assert_eq!(registry.pattern_count(), 2);
        assert_eq!(registry.limiter_count("/login"), 2);
        assert_eq!(registry.limiter_count("/signup"), 1);
        assert_eq!(registry.len(), 3);
        assert!(registry.get("/signup", "10.0.0.1").is_some());
        assert!(registry.get("/signup", "10.0.0.2").is_none());
    }

    #[test]
    fn test_endpoint_sweep_threshold_per_pattern() {
        let registry = EndpointRegistry::new();
        let spec = EndpointLimit::new(1, 1).spec();
        for i in 0..4 {
            registry.get_or_create("/busy", format!("10.0.0.{}", i).as_str(), &spec);
        }
        registry.get_or_create("/quiet", "10.0.0.1", &spec);

        assert_eq!(registry.sweep(2), 4);
        assert_eq!(registry.limiter_count("/busy"), 0);
        assert_eq!(registry.limiter_count("/quiet"), 1);
    }

    #[test]
    fn test_registries_sweep_report() {
        let registries = Registries::new();
        let spec = ip_spec(1);
        for i in 0..3u64 {
            registries.ip.get_or_create(format!("10.0.0.{}", i).as_str(), &spec);
            registries.user.get_or_create(&i, &spec);
        }
        registries.user.get_or_create(&99u64, &spec);

        let report = registries.sweep(3);
        assert_eq!(report.ip_cleared, 0);
        assert_eq!(report.user_cleared, 4);
        assert_eq!(report.total(), 4);

        registries.clear();
        assert!(registries.ip.is_empty());
    }
}
