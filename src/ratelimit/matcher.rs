//! Endpoint pattern matching.
//!
//! A request path is resolved to at most one configured pattern, most
//! specific first:
//!
//! 1. exact equality,
//! 2. a pattern ending in `/` that prefixes the path,
//! 3. a pattern that prefixes the path on a `/` boundary, so `/api/v1/auth`
//!    matches `/api/v1/auth/login` but not `/api/v1/authorization`.
//!
//! Within rules 2 and 3 the longest pattern wins; equal lengths fall back to
//! lexicographic order so the result never depends on map iteration order.

use std::collections::HashMap;

/// Resolves request paths against a fixed set of endpoint patterns.
#[derive(Debug, Clone, Default)]
pub struct EndpointMatcher {
    /// Patterns sorted by descending length, then lexicographically
    patterns: Vec<String>,
}

impl EndpointMatcher {
    /// Build a matcher from the configured endpoint limits.
    pub fn new<V>(endpoint_limits: &HashMap<String, V>) -> Self {
        Self::from_patterns(endpoint_limits.keys().cloned())
    }

    /// Build a matcher from a list of patterns.
    pub fn from_patterns<I>(patterns: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut patterns: Vec<String> = patterns.into_iter().collect();
        patterns.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        patterns.dedup();
        Self { patterns }
    }

    /// Find the pattern that governs `path`, if any.
    pub fn find(&self, path: &str) -> Option<&str> {
        if let Some(exact) = self.patterns.iter().find(|p| p.as_str() == path) {
            return Some(exact.as_str());
        }

        if let Some(dir) = self
            .patterns
            .iter()
            .find(|p| p.ends_with('/') && path.starts_with(p.as_str()))
        {
            return Some(dir.as_str());
        }

        self.patterns
            .iter()
            .find(|p| {
                path.strip_prefix(p.as_str())
                    .map_or(false, |rest| rest.starts_with('/'))
            })
            .map(String::as_str)
    }

    /// Number of patterns known to this matcher.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> EndpointMatcher {
        EndpointMatcher::from_patterns(patterns.iter().map(|p| p.to_string()))
    }

    #[test]
    fn test_exact_match() {
        let m = matcher(&["/login", "/api/v1/matches"]);
        assert_eq!(m.find("/login"), Some("/login"));
        assert_eq!(m.find("/api/v1/matches"), Some("/api/v1/matches"));
    }

    #[test]
    fn test_trailing_slash_prefix() {
        let m = matcher(&["/api/v1/tournaments/"]);
        assert_eq!(m.find("/api/v1/tournaments/42"), Some("/api/v1/tournaments/"));
        assert_eq!(m.find("/api/v1/tournaments"), None);
    }

    #[test]
    fn test_boundary_prefix() {
        let m = matcher(&["/api/v1/auth"]);
        assert_eq!(m.find("/api/v1/auth/refresh"), Some("/api/v1/auth"));
        assert_eq!(m.find("/api/v1/authorization"), None);
    }

    #[test]
    fn test_exact_beats_shorter_prefix() {
        let m = matcher(&["/api/v1/auth", "/api/v1/auth/login"]);
        assert_eq!(m.find("/api/v1/auth/login"), Some("/api/v1/auth/login"));
        assert_eq!(m.find("/api/v1/auth/logout"), Some("/api/v1/auth"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let m = matcher(&["/api", "/api/v1", "/api/v1/matches"]);
        assert_eq!(m.find("/api/v1/matches/7/score"), Some("/api/v1/matches"));
        assert_eq!(m.find("/api/v1/players"), Some("/api/v1"));
        assert_eq!(m.find("/api/v2"), Some("/api"));
    }

    #[test]
    fn test_slash_rule_precedes_boundary_rule() {
        let m = matcher(&["/api/", "/api/v1/matches"]);
        assert_eq!(m.find("/api/v1/matches/7"), Some("/api/"));
    }

    #[test]
    fn test_no_match() {
        let m = matcher(&["/login"]);
        assert_eq!(m.find("/health"), None);
        assert_eq!(m.find("/loginx"), None);
        assert!(EndpointMatcher::default().find("/anything").is_none());
    }

    #[test]
    fn test_built_from_config_map() {
        let mut limits = HashMap::new();
        limits.insert("/b".to_string(), ());
        limits.insert("/a".to_string(), ());
        let m = EndpointMatcher::new(&limits);
        assert_eq!(m.len(), 2);
        assert!(!m.is_empty());
        assert_eq!(m.find("/a/x"), Some("/a"));
    }
}
