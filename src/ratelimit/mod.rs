//! Rate limiting logic and state management.

mod bucket;
mod cleanup;
mod decision;
mod limiter;
mod matcher;
mod registry;
mod rules;

pub use bucket::{RateUnit, TokenBucket};
pub use cleanup::{CleanupScheduler, DEFAULT_CLEANUP_INTERVAL};
pub use decision::{DenialReason, Outcome, Quota, RateLimitDecision, RequestIdentity, Scope};
pub use limiter::{RateLimiter, RateLimiterStats};
pub use matcher::EndpointMatcher;
pub use registry::{EndpointRegistry, LimiterRegistry, Registries, SweepReport, DEFAULT_SWEEP_THRESHOLD};
pub use rules::{EndpointLimit, IpLimitConfig, LimitSpec, RateLimitConfig, UserLimitConfig};
