//! HTTP server hosting a router behind the rate limiter.

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limit_middleware, request_id_middleware};
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// HTTP server that rate limits every route of the router it serves.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { addr, rate_limiter }
    }

    /// Wrap `app` in the request-id and rate limit layers.
    pub fn layer(&self, app: Router) -> Router {
        app.layer(from_fn_with_state(
            Arc::clone(&self.rate_limiter),
            rate_limit_middleware,
        ))
        .layer(from_fn(request_id_middleware))
    }

    /// Serve `app` until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, app: Router, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.layer(app);
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(
            addr = %self.addr,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

/// Routes served by the standalone binary.
pub fn default_routes() -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .fallback(|| async { Json(json!({ "success": true })) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{IpLimitConfig, RateLimitConfig};
    use axum::body::Body;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let rate_limiter = Arc::new(RateLimiter::unlimited());
        let _server = HttpServer::new(addr, rate_limiter);
    }

    #[tokio::test]
    async fn test_layered_default_routes() {
        let limiter = Arc::new(
            RateLimiter::new(RateLimitConfig::new().with_ip_limits(IpLimitConfig::new(60, 2))).unwrap(),
        );
        let server = HttpServer::new("127.0.0.1:0".parse().unwrap(), Arc::clone(&limiter));
        let app = server.layer(default_routes());

        let request = || {
            axum::http::Request::builder()
                .uri("/api/v1/tournaments")
                .header("x-real-ip", "203.0.113.5")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.headers()["x-ratelimit-ip-remaining"], "1");

        app.clone().oneshot(request()).await.unwrap();
        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let server = HttpServer::new("127.0.0.1:0".parse().unwrap(), Arc::new(RateLimiter::unlimited()));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(server.serve_with_shutdown(default_routes(), async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }
}
