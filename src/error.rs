use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type alias for Result with AssistantError
pub type Result<T> = std::result::Result<T, AssistantError>;

/// Error types for the executive assistant engine
#[derive(Error, Debug)]
pub enum AssistantError {
    /// Remote model call failed (transport, overload, bad gateway, ...)
    #[error("Model error: {0}")]
    ModelError(String),

    /// An upstream service (mail, calendar, ...) returned an error we could not type
    #[error("Service error ({service}): {message}")]
    ServiceError { service: String, message: String },

    /// Upstream rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Authentication or permission failure
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Network-related error (connection issues, resets, ...)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Local sliding-window limiter rejected the call
    #[error("Rate limiter rejected call to {service}: limit of {limit} calls per window reached")]
    RateLimited { service: String, limit: u32 },

    /// Circuit breaker is open (rejecting requests)
    #[error("Circuit breaker open for {service}. Will retry after {retry_after_secs} seconds")]
    CircuitBreakerOpen {
        service: String,
        retry_after_secs: u64,
    },

    /// Caller-supplied deadline elapsed
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Model output did not follow the expected protocol
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Tool call could not be turned into a permitted action
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Preference/record store failure
    #[error("Store error: {0}")]
    StoreError(String),

    /// Audit sink failure
    #[error("Audit error: {0}")]
    AuditError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Coarse error classification used for metrics labels and audit records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    AuthError,
    Timeout,
    CircuitOpen,
    Protocol,
    Generic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl AssistantError {
    /// Whether this error was produced by the resilience layer refusing a call
    /// rather than by the dependency itself
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AssistantError::CircuitBreakerOpen { .. } | AssistantError::RateLimited { .. }
        )
    }

    /// Classify the error. Typed variants map directly; untyped service
    /// errors fall back to inspecting their message text.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssistantError::RateLimitExceeded { .. } | AssistantError::RateLimited { .. } => {
                ErrorKind::RateLimit
            }
            AssistantError::AuthError(_) => ErrorKind::AuthError,
            AssistantError::Timeout(_) => ErrorKind::Timeout,
            AssistantError::CircuitBreakerOpen { .. } => ErrorKind::CircuitOpen,
            AssistantError::ProtocolViolation(_) | AssistantError::InvalidAction(_) => {
                ErrorKind::Protocol
            }
            AssistantError::ServiceError { message, .. } | AssistantError::ModelError(message) => {
                classify_message(message)
            }
            _ => ErrorKind::Generic,
        }
    }
}

/// Classify a free-text service error message.
///
/// Substring matching is ambiguous across upstream services ("quota" can mean
/// storage quota, "permission" can be a calendar sharing setting). It only
/// runs for errors that arrive without a typed variant.
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("quota") || lower.contains("rate limit") {
        ErrorKind::RateLimit
    } else if lower.contains("auth") || lower.contains("permission") {
        ErrorKind::AuthError
    } else {
        ErrorKind::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections() {
        assert!(AssistantError::RateLimited {
            service: "llm".to_string(),
            limit: 10
        }
        .is_rejection());
        assert!(AssistantError::CircuitBreakerOpen {
            service: "llm".to_string(),
            retry_after_secs: 30
        }
        .is_rejection());
        assert!(!AssistantError::ModelError("boom".to_string()).is_rejection());
    }

    #[test]
    fn test_typed_kinds() {
        assert_eq!(
            AssistantError::RateLimitExceeded { retry_after: 1 }.kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(
            AssistantError::AuthError("x".to_string()).kind(),
            ErrorKind::AuthError
        );
        assert_eq!(
            AssistantError::Timeout(Duration::from_millis(10)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            AssistantError::InvalidAction("x".to_string()).kind(),
            ErrorKind::Protocol
        );
    }

    #[test]
    fn test_classify_message_fallback() {
        assert_eq!(classify_message("Quota exceeded for project"), ErrorKind::RateLimit);
        assert_eq!(classify_message("429 Rate Limit hit"), ErrorKind::RateLimit);
        assert_eq!(classify_message("OAuth token expired"), ErrorKind::AuthError);
        assert_eq!(classify_message("insufficient permission"), ErrorKind::AuthError);
        assert_eq!(classify_message("internal error"), ErrorKind::Generic);

        let untyped = AssistantError::ServiceError {
            service: "gmail".to_string(),
            message: "User rate limit exceeded".to_string(),
        };
        assert_eq!(untyped.kind(), ErrorKind::RateLimit);
    }

    #[test]
    fn test_error_display() {
        let error = AssistantError::CircuitBreakerOpen {
            service: "llm".to_string(),
            retry_after_secs: 42,
        };
        let display = format!("{}", error);
        assert!(display.contains("Circuit breaker open for llm"));
        assert!(display.contains("42 seconds"));

        assert_eq!(ErrorKind::AuthError.to_string(), "auth_error");
    }
}
