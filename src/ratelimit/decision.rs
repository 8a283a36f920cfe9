//! Per-request decision types.

use serde::Serialize;
use std::fmt;

/// What the limiter needs to know about an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestIdentity<'a> {
    /// Request path, without query string
    pub path: &'a str,
    /// Resolved client IP (or the raw fallback string)
    pub client_ip: &'a str,
    /// User identifier attached by upstream authentication
    pub user_id: Option<u64>,
}

impl<'a> RequestIdentity<'a> {
    pub fn new(path: &'a str, client_ip: &'a str) -> Self {
        Self {
            path,
            client_ip,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// The dimension a quota or denial belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Endpoint,
    Ip,
    User,
}

/// Throttling state reported for one check that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub scope: Scope,
    /// Configured rate (per second for endpoints, per minute otherwise)
    pub limit: u32,
    /// Whole tokens left after this request
    pub remaining: u32,
    /// Unix timestamp: evaluation time plus the configured window
    pub reset: i64,
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DenialReason {
    #[serde(rename = "RATE_LIMIT_ENDPOINT_EXCEEDED")]
    EndpointExceeded,
    #[serde(rename = "RATE_LIMIT_IP_EXCEEDED")]
    IpExceeded,
    #[serde(rename = "RATE_LIMIT_USER_EXCEEDED")]
    UserExceeded,
}

impl DenialReason {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::EndpointExceeded => "RATE_LIMIT_ENDPOINT_EXCEEDED",
            DenialReason::IpExceeded => "RATE_LIMIT_IP_EXCEEDED",
            DenialReason::UserExceeded => "RATE_LIMIT_USER_EXCEEDED",
        }
    }

    /// Human-readable explanation for the response body.
    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::EndpointExceeded => "Too many requests to this endpoint, please try again later",
            DenialReason::IpExceeded => "Too many requests from this IP address, please try again later",
            DenialReason::UserExceeded => "Too many requests for this user, please try again later",
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            DenialReason::EndpointExceeded => Scope::Endpoint,
            DenialReason::IpExceeded => Scope::Ip,
            DenialReason::UserExceeded => Scope::User,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Terminal state of the decision pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Client IP is exempt; no check ran
    Excluded,
    /// Every applicable check admitted the request
    Allowed,
    /// A check rejected the request; later checks did not run
    Denied(DenialReason),
}

/// Result of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub outcome: Outcome,
    /// One entry per check that ran, in evaluation order
    pub quotas: Vec<Quota>,
}

impl RateLimitDecision {
    pub fn excluded() -> Self {
        Self {
            outcome: Outcome::Excluded,
            quotas: Vec::new(),
        }
    }

    /// Whether the request may proceed downstream.
    pub fn is_allowed(&self) -> bool {
        !matches!(self.outcome, Outcome::Denied(_))
    }

    pub fn denial(&self) -> Option<DenialReason> {
        match self.outcome {
            Outcome::Denied(reason) => Some(reason),
            _ => None,
        }
    }

    /// The quota reported for `scope`, if that check ran.
    pub fn quota(&self, scope: Scope) -> Option<&Quota> {
        self.quotas.iter().find(|q| q.scope == scope)
    }
}
