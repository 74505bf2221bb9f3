//! Crate-level error types.
//!
//! [`PulseError`] unifies every error source (configuration, HTTP, JSON,
//! storage, delivery) behind a single enum so callers can match on the
//! variant they care about while still using the `?` operator for easy
//! propagation.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PulseError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    /// A configuration file or environment variable was missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// An HTTP request to the exchange failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The exchange answered with an error payload or an unexpected shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A persistence operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// A notification could not be delivered to one recipient.
    #[error("notify error: {0}")]
    Notify(String),

    /// A background computation was dropped before producing a result.
    #[error("worker error: {0}")]
    Worker(String),
}
