//! Logging configuration and utilities.

use regex::Regex;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

use crate::errors::{ModelScopeError, ModelScopeResult};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Trace level.
    Trace = 0,
    /// Debug level.
    Debug = 1,
    /// Info level.
    #[default]
    Info = 2,
    /// Warning level.
    Warn = 3,
    /// Error level.
    Error = 4,
    /// Off (no logging).
    Off = 5,
}

impl LogLevel {
    /// Returns the level as an `EnvFilter` directive.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is not set.
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include the event target (module path).
    pub with_target: bool,
    /// Maximum body length to log.
    pub max_body_length: usize,
    /// Redact sensitive data.
    pub redact_sensitive: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            with_target: true,
            max_body_length: 1024,
            redact_sensitive: true,
        }
    }
}

impl LogConfig {
    /// Creates a new log configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log level.
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Switches to JSON output.
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Disables sensitive data redaction.
    pub fn no_redact(mut self) -> Self {
        self.redact_sensitive = false;
        self
    }

    /// Prepares a response body for a log line: redacted and truncated.
    pub fn loggable_body(&self, body: &str) -> String {
        let body = if self.redact_sensitive {
            redact(body)
        } else {
            body.to_string()
        };
        truncate(&body, self.max_body_length)
    }
}

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over [`LogConfig::level`]. Fails if a
/// subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> ModelScopeResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| {
        ModelScopeError::configuration(format!("Failed to install tracing subscriber: {}", e))
    })
}

fn redaction_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer ***"),
            (
                r#"(?i)(api[_-]?key|access[_-]?token)("?\s*[=:]\s*"?)[^\s",}]+"#,
                "${1}${2}***",
            ),
            (r"ms-[A-Za-z0-9-]{8,}", "ms-***"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Some((Regex::new(pattern).ok()?, replacement)))
        .collect()
    })
}

/// Masks bearer tokens and API keys in free text.
pub fn redact(text: &str) -> String {
    redaction_rules()
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::default().directive(), "info");
        assert_eq!(LogLevel::Off.directive(), "off");
    }

    #[test]
    fn test_redact_bearer_and_keys() {
        let redacted = redact("Authorization: Bearer ms-abcdef123456");
        assert!(!redacted.contains("abcdef123456"));
        assert!(redacted.contains("Bearer ***"));

        let redacted = redact("invalid key ms-0f1e2d3c4b5a");
        assert_eq!(redacted, "invalid key ms-***");

        let redacted = redact(r#"{"api_key": "abc123"}"#);
        assert_eq!(redacted, r#"{"api_key": "***"}"#);
    }

    #[test]
    fn test_redact_leaves_plain_text() {
        let text = "model is overloaded, retry later";
        assert_eq!(redact(text), text);
    }

    #[test]
    fn test_loggable_body() {
        let config = LogConfig {
            max_body_length: 8,
            ..LogConfig::default()
        };
        assert_eq!(config.loggable_body("0123456789"), "01234567...");
        assert_eq!(config.loggable_body("short"), "short");

        let raw = LogConfig::new().no_redact();
        assert_eq!(raw.loggable_body("Bearer xyz"), "Bearer xyz");
    }
}
