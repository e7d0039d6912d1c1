//! # Harbor Common
//!
//! Shared error type, logging setup and retry helpers used by every Harbor crate.
//!
//! ## Features
//!
//! - `HarborError` umbrella error with category and retry classification
//! - Logging configuration on top of `tracing-subscriber`
//! - Retry with exponential backoff and timeouts
//! - Result/Option extension traits

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Umbrella error for the resilience layer.
#[derive(Error, Debug)]
pub enum HarborError {
    /// A network round-trip failed.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Reading or writing the cache store failed.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Install or activate of a background worker failed.
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Permission, token issuance or token persistence failed.
    #[error("Push error: {message}")]
    Push {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl HarborError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error wrapping its cause.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: None,
        }
    }

    pub fn push(message: impl Into<String>) -> Self {
        Self::Push {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error wrapping its cause.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarborError::Network { .. } | HarborError::Timeout(_) | HarborError::Io(_)
        )
    }

    /// Short category label, used as a structured logging field.
    pub fn category(&self) -> &'static str {
        match self {
            HarborError::Network { .. } => "network",
            HarborError::Cache { .. } => "cache",
            HarborError::Lifecycle { .. } => "lifecycle",
            HarborError::Push { .. } => "push",
            HarborError::Config { .. } => "config",
            HarborError::Io(_) => "io",
            HarborError::Timeout(_) => "timeout",
            HarborError::Cancelled => "cancelled",
            HarborError::NotFound(_) => "not_found",
            HarborError::InvalidArgument(_) => "invalid_argument",
            HarborError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for Harbor operations.
pub type Result<T> = std::result::Result<T, HarborError>;

/// Extension trait for foreign results.
pub trait ResultExt<T> {
    /// Wrap the error as an internal error with a message prefix.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| HarborError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| HarborError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(HarborError::cache("quota").category(), "cache");
        assert_eq!(HarborError::push("denied").category(), "push");
        assert_eq!(
            HarborError::Timeout(Duration::from_secs(1)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(HarborError::network("offline").is_retryable());
        assert!(HarborError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!HarborError::push("denied").is_retryable());
        assert!(!HarborError::Cancelled.is_retryable());
    }

    #[test]
    fn test_context_wraps_message() {
        let parsed: std::result::Result<u32, _> = "x".parse::<u32>();
        let err = parsed.context("parsing capacity").unwrap_err();
        assert!(err.to_string().starts_with("Internal error: parsing capacity"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("tier"),
            Err(HarborError::NotFound(_))
        ));
        assert_eq!(Some(7).ok_or_not_found("tier").unwrap(), 7);
    }
}
