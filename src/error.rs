//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Requests rejected by a rate limit are not errors; they are reported as
/// [`crate::ratelimit::Outcome::Denied`].
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Invalid or unparseable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered configuration source errors
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
