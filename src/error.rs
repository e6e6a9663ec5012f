//! Error types for the Ratewarden engine.

use thiserror::Error;

/// Boxed error returned by user-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum RateWardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No client key extractor was configured and the request carries no
    /// remote address.
    #[error("Configuration error: cannot identify client (no key extractor configured and no remote address on request)")]
    MissingClientIdentity,

    /// The client key extractor itself failed
    #[error("Client key extraction failed: {0}")]
    KeyExtraction(String),

    /// The `on_rate_limit_exceeded` callback failed
    #[error("Rate limit callback failed: {0}")]
    Callback(#[source] BoxError),

    /// Errors from layered configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),
}

impl RateWardenError {
    /// Whether this error stems from how the limiter was set up rather than
    /// from the request or the embedding application's callbacks.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RateWardenError::Config(_)
                | RateWardenError::MissingClientIdentity
                | RateWardenError::ConfigSource(_)
        )
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, RateWardenError>;
