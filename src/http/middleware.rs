//! axum middleware running the rate limit pipeline in front of a router.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::client_ip::resolve_client_ip;
use super::headers::{annotate, denial_response};
use crate::ratelimit::{Outcome, RateLimiter, RequestIdentity};

pub const X_REQUEST_ID: &str = "x-request-id";

/// User identifier placed in request extensions by upstream authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub u64);

/// Correlation identifier placed in request extensions upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Rate limit every request passing through.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/v1/auth/login", post(login))
///     .layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));
/// ```
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = resolve_client_ip(request.headers(), remote_addr);

    let identity = RequestIdentity {
        path: request.uri().path(),
        client_ip: &client_ip,
        user_id: request.extensions().get::<AuthenticatedUser>().map(|user| user.0),
    };
    let decision = limiter.check(&identity);

    match decision.outcome {
        Outcome::Denied(reason) => {
            let request_id = request.extensions().get::<RequestId>().map(|id| id.0.as_str());
            debug!(
                path = request.uri().path(),
                client_ip = %client_ip,
                reason = %reason,
                request_id = ?request_id,
                "Request rejected by rate limiter"
            );
            denial_response(reason, &decision.quotas, request_id)
        }
        Outcome::Allowed | Outcome::Excluded => {
            let mut response = next.run(request).await;
            annotate(response.headers_mut(), &decision.quotas);
            response
        }
    }
}

/// Attach a [`RequestId`] to every request and echo it on the response.
///
/// An inbound `X-Request-ID` is reused; otherwise a UUIDv4 is generated.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}
