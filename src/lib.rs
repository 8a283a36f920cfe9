//! Turnstile - Multi-dimensional HTTP Rate Limiting
//!
//! This crate implements an in-process rate limiter that throttles HTTP
//! traffic independently per endpoint, per client IP and per authenticated
//! user, using continuously refilling token buckets. It ships as axum
//! middleware plus a small standalone server.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
