//! Error types for pulsechain
//!
//! One enum covers every failure the engine can surface. Retry policy and the
//! user-facing wording both hang off this type so that the executor, the chain
//! runner and the CLI agree on them.

use thiserror::Error;

/// Main error type for pulsechain
#[derive(Error, Debug)]
pub enum PulsechainError {
    /// Malformed input: bad method token, bad JSON, bad template
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Security validation failed for {url}: {reason}")]
    SecurityValidationFailed { url: String, reason: String },

    #[error("Connection refused to {url}{}", .hint.as_ref().map(|h| format!(". {}", h)).unwrap_or_default())]
    ConnectionRefused { url: String, hint: Option<String> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:.1} seconds")]
    Timeout(f64),

    #[error("Server error: HTTP {status} {status_text}")]
    Server { status: u16, status_text: String },

    /// 4xx other than 429. The executor hands these back as responses; the
    /// variant exists so [`from_status`](Self::from_status) can classify them.
    #[error("Client error: HTTP {status} {status_text}")]
    Client { status: u16, status_text: String },

    #[error("Rate limited: HTTP 429")]
    RateLimited,

    #[error("Script error: {0}")]
    Script(String),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Config error: {0}")]
    Config(String),

    /// Persistent cache tier failure. The cache logs and swallows these.
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PulsechainError {
    /// Error class of an HTTP status, `None` below 400
    pub fn from_status(status: u16, status_text: impl Into<String>) -> Option<Self> {
        let status_text = status_text.into();
        match status {
            429 => Some(PulsechainError::RateLimited),
            400..=499 => Some(PulsechainError::Client { status, status_text }),
            500..=599 => Some(PulsechainError::Server { status, status_text }),
            _ => None,
        }
    }

    /// Whether a failed attempt may be retried.
    ///
    /// Transport failures, 5xx and 429 are transient. Other 4xx, validation,
    /// security and script errors will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PulsechainError::ConnectionRefused { .. }
            | PulsechainError::Network(_)
            | PulsechainError::Timeout(_)
            | PulsechainError::Server { .. }
            | PulsechainError::RateLimited => true,
            _ => false,
        }
    }

    /// Network-class failure (transport level or 5xx), without 429
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PulsechainError::ConnectionRefused { .. }
                | PulsechainError::Network(_)
                | PulsechainError::Timeout(_)
                | PulsechainError::Server { .. }
        )
    }

    /// Map an error to the message shown to a user.
    pub fn user_message(&self) -> String {
        match self {
            PulsechainError::InvalidUrl { url, .. } => {
                format!("The URL '{}' is not valid. Check the scheme and host.", url)
            }
            PulsechainError::SecurityValidationFailed { reason, .. } => {
                format!("Request blocked by security policy: {}", reason)
            }
            PulsechainError::ConnectionRefused { url, hint } => match hint {
                Some(hint) => format!("Could not connect to {}. {}", url, hint),
                None => format!("Could not connect to {}. Is the server running?", url),
            },
            PulsechainError::Network(_) => {
                "Network error. Check your connection and try again.".to_string()
            }
            PulsechainError::Timeout(secs) => {
                format!("The request timed out after {:.1} seconds.", secs)
            }
            PulsechainError::Server { status, .. } => {
                format!("The server failed to handle the request (HTTP {}).", status)
            }
            PulsechainError::Client { status, .. } => match status {
                400 => "Bad request. Check the request parameters.".to_string(),
                401 => "Unauthorized. Check your credentials.".to_string(),
                403 => "Forbidden. You do not have access to this resource.".to_string(),
                404 => "Not found. Check the URL.".to_string(),
                _ => format!("The request was rejected (HTTP {}).", status),
            },
            PulsechainError::RateLimited => {
                "Too many requests. Wait a moment and try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PulsechainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PulsechainError::Network("reset".into()).is_retryable());
        assert!(PulsechainError::Timeout(30.0).is_retryable());
        assert!(PulsechainError::RateLimited.is_retryable());
        assert!(PulsechainError::Server { status: 503, status_text: "Service Unavailable".into() }.is_retryable());
        assert!(!PulsechainError::Client { status: 404, status_text: "Not Found".into() }.is_retryable());
        assert!(!PulsechainError::Validation("bad".into()).is_retryable());
        assert!(!PulsechainError::Script("boom".into()).is_retryable());
    }

    #[test]
    fn test_rate_limit_is_not_network_error() {
        assert!(!PulsechainError::RateLimited.is_network_error());
        assert!(PulsechainError::Server { status: 500, status_text: String::new() }.is_network_error());
    }

    #[test]
    fn test_connection_refused_message_includes_hint() {
        let err = PulsechainError::ConnectionRefused {
            url: "http://localhost:3000/users".into(),
            hint: Some("Make sure the mock server is running".into()),
        };
        assert!(err.to_string().contains("mock server"));
        assert!(err.user_message().contains("localhost:3000"));
    }

    #[test]
    fn test_status_classification() {
        assert!(PulsechainError::from_status(204, "No Content").is_none());
        assert!(matches!(PulsechainError::from_status(429, "Too Many Requests"), Some(PulsechainError::RateLimited)));
        assert!(matches!(
            PulsechainError::from_status(503, "Service Unavailable"),
            Some(PulsechainError::Server { status: 503, .. })
        ));

        let not_found = PulsechainError::from_status(404, "Not Found").unwrap();
        assert!(matches!(not_found, PulsechainError::Client { status: 404, .. }));
        assert!(!not_found.is_retryable());
        assert_eq!(not_found.user_message(), "Not found. Check the URL.");
    }

    #[test]
    fn test_cache_errors_are_not_retryable() {
        let err = PulsechainError::Cache("corrupt entry".into());
        assert!(!err.is_retryable());
        assert_eq!(err.user_message(), "Cache error: corrupt entry");
    }

    #[test]
    fn test_client_error_messages() {
        let err = PulsechainError::Client { status: 401, status_text: "Unauthorized".into() };
        assert!(err.user_message().starts_with("Unauthorized"));
    }
}
