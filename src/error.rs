//! Error types and conversions used throughout the runtime.
//!
//! One `Error` enum covers every error kind enumerated in the agent loop's
//! error handling design: transient and non-retryable provider errors,
//! gadget validation/runtime/timeout failures, dependency skips, parser
//! structural errors, budget/iteration termination, cancellation, and
//! configuration errors raised at construction time.

use thiserror::Error as ThisError;

/// The runtime's error type.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Network-level failure talking to the provider.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Failure serializing or deserializing JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or incomplete configuration, raised at `Agent` construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-retryable (or retry-exhausted) error reported by the provider.
    #[error("API error: {0}")]
    Api(String),

    /// Error while consuming or parsing the provider's stream.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Structural error from the Block Parser (malformed sentinel block).
    #[error("Parser error: {0}")]
    Parser(String),

    /// A gadget's handler raised an error outside normal result reporting.
    #[error("Gadget error: {0}")]
    Gadget(String),

    /// Dependency-DAG or execution-policy error from the scheduler.
    #[error("Scheduler error: {0}")]
    Schedule(String),

    /// Compaction could not proceed (e.g. summarizer required but absent).
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// Caller-supplied input failed validation before use.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request timed out.
    #[error("Operation timed out")]
    Timeout,

    /// The run was cancelled via the cooperative cancellation token.
    #[error("Operation was cancelled")]
    Cancelled,

    /// The configured cost budget was exceeded.
    #[error("Budget exceeded: {0}")]
    Budget(String),

    /// Catch-all for errors that don't fit another variant.
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn parser(msg: impl Into<String>) -> Self {
        Error::Parser(msg.into())
    }

    pub fn gadget(msg: impl Into<String>) -> Self {
        Error::Gadget(msg.into())
    }

    pub fn schedule(msg: impl Into<String>) -> Self {
        Error::Schedule(msg.into())
    }

    pub fn compaction(msg: impl Into<String>) -> Self {
        Error::Compaction(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    pub fn cancelled() -> Self {
        Error::Cancelled
    }

    pub fn budget(msg: impl Into<String>) -> Self {
        Error::Budget(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

/// Convenience result alias used across the public API.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::config("bad").to_string(), "Configuration error: bad");
        assert_eq!(Error::api("bad").to_string(), "API error: bad");
        assert_eq!(Error::stream("bad").to_string(), "Stream error: bad");
        assert_eq!(Error::parser("bad").to_string(), "Parser error: bad");
        assert_eq!(Error::gadget("bad").to_string(), "Gadget error: bad");
        assert_eq!(Error::schedule("bad").to_string(), "Scheduler error: bad");
        assert_eq!(
            Error::compaction("bad").to_string(),
            "Compaction error: bad"
        );
        assert_eq!(
            Error::invalid_input("bad").to_string(),
            "Invalid input: bad"
        );
        assert_eq!(Error::timeout().to_string(), "Operation timed out");
        assert_eq!(Error::cancelled().to_string(), "Operation was cancelled");
        assert_eq!(Error::budget("over").to_string(), "Budget exceeded: over");
        assert_eq!(Error::other("bad").to_string(), "Error: bad");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
