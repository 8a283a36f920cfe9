//! HTTP integration for the rate limiter.
//!
//! The limiter is installed as axum middleware. Upstream layers may attach
//! [`AuthenticatedUser`] and [`RequestId`] extensions; the middleware reads
//! both and writes throttling headers on every response it touches.

mod client_ip;
mod headers;
mod middleware;
mod server;

pub use client_ip::{resolve_client_ip, UNKNOWN_CLIENT};
pub use headers::{annotate, denial_response, DenialBody, RETRY_AFTER_SECS};
pub use middleware::{rate_limit_middleware, request_id_middleware, AuthenticatedUser, RequestId};
pub use server::{default_routes, HttpServer};
