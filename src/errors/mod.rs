//! Error types for the ModelScope client.
//!
//! Every failure is either transient (rate limits, gateway errors, network
//! faults, timeouts, dropped streams), which the retry engine absorbs up to
//! its budget, or fatal, which is surfaced to the caller immediately.
//! Malformed stream lines never become errors; the decoder logs and skips
//! them.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for ModelScope operations.
pub type ModelScopeResult<T> = Result<T, ModelScopeError>;

/// Status codes that are worth retrying.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Error type for ModelScope client operations.
#[derive(Debug, Error)]
pub enum ModelScopeError {
    /// Configuration error (missing API key, invalid base URL, bad policy).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue.
        message: String,
    },

    /// Authentication or authorization failure (401/403).
    #[error("Authentication failed (HTTP {status_code}): {message}")]
    Authentication {
        /// Error message from the API.
        message: String,
        /// HTTP status code.
        status_code: u16,
    },

    /// The request was rejected as malformed, or failed local validation.
    #[error("Validation error: {message}")]
    Validation {
        /// Error message describing the validation issue.
        message: String,
        /// The parameter that caused the error.
        param: Option<String>,
    },

    /// Rate limit exceeded (429).
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        /// Error message.
        message: String,
        /// Server-suggested wait, if a `retry-after` header was present.
        retry_after: Option<Duration>,
        /// Raw response body.
        body: Option<String>,
    },

    /// Transient server-side error (500, 502, 503, 504).
    #[error("Server error (HTTP {status_code}): {message}")]
    Server {
        /// Error message.
        message: String,
        /// HTTP status code.
        status_code: u16,
        /// Request ID for debugging.
        request_id: Option<String>,
        /// Raw response body.
        body: Option<String>,
    },

    /// Any other non-success status. Not retried.
    #[error("API error (HTTP {status_code}): {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message.
        message: String,
        /// Raw response body.
        body: Option<String>,
    },

    /// Network/connection error.
    #[error("Network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Underlying cause.
        cause: Option<String>,
    },

    /// An attempt exceeded its time budget.
    #[error("Request timeout: {message}")]
    Timeout {
        /// Error message.
        message: String,
    },

    /// The event stream broke after decoding had started.
    #[error("Stream error: {message}")]
    Stream {
        /// Error message.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// A well-formed response that violates the protocol contract.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The failure of the final attempt.
        #[source]
        last_error: Box<ModelScopeError>,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled while {stage}")]
    Cancelled {
        /// Where the operation was suspended when cancellation arrived.
        stage: CancelStage,
    },
}

/// Suspension point at which an operation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStage {
    /// Waiting for a queue slot or the inter-request spacing.
    Queue,
    /// Sleeping between retries.
    Backoff,
    /// A network attempt was in flight.
    Attempt,
    /// The consumer dropped a fragment stream.
    Stream,
}

impl fmt::Display for CancelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            CancelStage::Queue => "queued",
            CancelStage::Backoff => "backing off",
            CancelStage::Attempt => "awaiting a response",
            CancelStage::Stream => "streaming",
        };
        f.write_str(stage)
    }
}

impl ModelScopeError {
    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelScopeError::RateLimit { .. }
            | ModelScopeError::Network { .. }
            | ModelScopeError::Timeout { .. }
            | ModelScopeError::Stream { .. } => true,
            ModelScopeError::Server { status_code, .. } => {
                RETRYABLE_STATUS_CODES.contains(status_code)
            }
            _ => false,
        }
    }

    /// Returns true if the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ModelScopeError::Cancelled { .. })
    }

    /// Returns the HTTP status code carried by this error, if any.
    ///
    /// For [`ModelScopeError::RetriesExhausted`] this is the status of the
    /// last attempt.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ModelScopeError::Authentication { status_code, .. }
            | ModelScopeError::Server { status_code, .. }
            | ModelScopeError::Api { status_code, .. } => Some(*status_code),
            ModelScopeError::RateLimit { .. } => Some(429),
            ModelScopeError::RetriesExhausted { last_error, .. } => last_error.status_code(),
            _ => None,
        }
    }

    /// Returns the raw response body kept for diagnostics, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            ModelScopeError::RateLimit { body, .. }
            | ModelScopeError::Server { body, .. }
            | ModelScopeError::Api { body, .. } => body.as_deref(),
            ModelScopeError::RetriesExhausted { last_error, .. } => last_error.body(),
            _ => None,
        }
    }

    /// Returns the retry-after duration if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelScopeError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        ModelScopeError::Validation {
            message: message.into(),
            param: None,
        }
    }

    /// Creates a validation error with parameter.
    pub fn validation_param(message: impl Into<String>, param: impl Into<String>) -> Self {
        ModelScopeError::Validation {
            message: message.into(),
            param: Some(param.into()),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        ModelScopeError::Configuration {
            message: message.into(),
        }
    }

    /// Builds the error for a non-success HTTP response.
    ///
    /// The body is kept verbatim for diagnostics; the message prefers the
    /// API's own `error.message` field, then the body text, then the
    /// status line.
    pub fn from_status(status: u16, headers: &HashMap<String, String>, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body).trim().to_string();
        let message = extract_error_message(&text).unwrap_or_else(|| {
            if text.is_empty() {
                let reason = http::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                format!("API error: {} {}", status, reason)
            } else {
                text.clone()
            }
        });
        let body = (!text.is_empty()).then_some(text);

        match status {
            401 | 403 => ModelScopeError::Authentication {
                message,
                status_code: status,
            },
            400 | 422 => ModelScopeError::Validation {
                message,
                param: None,
            },
            429 => ModelScopeError::RateLimit {
                message,
                retry_after: headers
                    .get("retry-after")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs),
                body,
            },
            500 | 502 | 503 | 504 => ModelScopeError::Server {
                message,
                status_code: status,
                request_id: headers.get("x-request-id").cloned(),
                body,
            },
            _ => ModelScopeError::Api {
                status_code: status,
                message,
                body,
            },
        }
    }
}

/// Pulls a human-readable message out of a JSON error body.
fn extract_error_message(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    ["/error/message", "/errors/message", "/message", "/error"]
        .iter()
        .find_map(|pointer| value.pointer(pointer).and_then(|v| v.as_str()))
        .map(str::to_string)
}

impl From<reqwest::Error> for ModelScopeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelScopeError::Timeout {
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ModelScopeError::Serialization {
                message: err.to_string(),
            }
        } else {
            ModelScopeError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(ToString::to_string),
            }
        }
    }
}

impl From<TransportError> for ModelScopeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } => ModelScopeError::Timeout {
                message: err.to_string(),
            },
            TransportError::Connection { ref message } | TransportError::Body { ref message } => {
                ModelScopeError::Network {
                    message: err.to_string(),
                    cause: Some(message.clone()),
                }
            }
        }
    }
}

impl From<serde_json::Error> for ModelScopeError {
    fn from(err: serde_json::Error) -> Self {
        ModelScopeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for ModelScopeError {
    fn from(err: url::ParseError) -> Self {
        ModelScopeError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}
