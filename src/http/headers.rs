//! Throttling response metadata.
//!
//! Every check that ran contributes limit/remaining/reset headers, on both
//! admitted and rejected requests. Rejections additionally carry a fixed
//! `Retry-After` and a JSON body with a stable error code.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::ratelimit::{DenialReason, Quota, Scope};

/// Seconds clients are told to wait after any rejection.
pub const RETRY_AFTER_SECS: u64 = 60;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const X_RATELIMIT_IP_LIMIT: &str = "x-ratelimit-ip-limit";
pub const X_RATELIMIT_IP_REMAINING: &str = "x-ratelimit-ip-remaining";
pub const X_RATELIMIT_IP_RESET: &str = "x-ratelimit-ip-reset";
pub const X_RATELIMIT_USER_LIMIT: &str = "x-ratelimit-user-limit";
pub const X_RATELIMIT_USER_REMAINING: &str = "x-ratelimit-user-remaining";
pub const X_RATELIMIT_USER_RESET: &str = "x-ratelimit-user-reset";

/// Header names for one scope: (limit, remaining, reset).
fn header_names(scope: Scope) -> (&'static str, &'static str, &'static str) {
    match scope {
        Scope::Endpoint => (X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET),
        Scope::Ip => (X_RATELIMIT_IP_LIMIT, X_RATELIMIT_IP_REMAINING, X_RATELIMIT_IP_RESET),
        Scope::User => (X_RATELIMIT_USER_LIMIT, X_RATELIMIT_USER_REMAINING, X_RATELIMIT_USER_RESET),
    }
}

/// Write the headers for every quota in `quotas`.
pub fn annotate(headers: &mut HeaderMap, quotas: &[Quota]) {
    for quota in quotas {
        let (limit, remaining, reset) = header_names(quota.scope);
        headers.insert(limit, HeaderValue::from(quota.limit));
        headers.insert(remaining, HeaderValue::from(quota.remaining));
        headers.insert(reset, HeaderValue::from(quota.reset));
    }
}

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenialBody {
    pub success: bool,
    pub error: &'static str,
    pub message: &'static str,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl DenialBody {
    pub fn new(reason: DenialReason, request_id: Option<&str>) -> Self {
        Self {
            success: false,
            error: reason.code(),
            message: reason.message(),
            code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            request_id: request_id.map(str::to_string),
        }
    }
}

/// Build the terminal response for a rejected request.
pub fn denial_response(reason: DenialReason, quotas: &[Quota], request_id: Option<&str>) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(DenialBody::new(reason, request_id)),
    )
        .into_response();

    let headers = response.headers_mut();
    annotate(headers, quotas);
    headers.insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from(RETRY_AFTER_SECS),
    );

    response
}
