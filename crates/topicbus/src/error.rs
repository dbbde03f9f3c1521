//! Error types for bus operations, handler invocation and configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors returned synchronously by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The subscribe target is not a callable handler.
    #[error("value subscribed to topic {topic} is not invocable")]
    NotInvocable {
        /// Topic the subscription was attempted on.
        topic: String,
    },

    /// The topic has no live handlers.
    #[error("topic {topic} is not registered")]
    UnknownTopic {
        /// The unknown topic.
        topic: String,
    },

    /// A reply was requested on a topic without exactly one handler.
    #[error("topic {topic} has the wrong number of handlers (expected {expected}, actual {actual})")]
    HandlerCountMismatch {
        /// The topic.
        topic: String,
        /// Number of handlers a reply requires.
        expected: usize,
        /// Number of handlers currently registered.
        actual: usize,
    },

    /// The handler did not reply before the deadline.
    #[error("handler for topic {topic} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// The topic.
        topic: String,
        /// The deadline the caller supplied.
        timeout: Duration,
    },

    /// No tokio runtime was available to run the handler on.
    #[error("no async runtime available to dispatch topic {topic}")]
    NoRuntime {
        /// The topic.
        topic: String,
    },
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Failures raised while invoking a single handler.
///
/// These never reach a publisher; dispatch logs them and moves on.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Wrong number of positional arguments.
    #[error("handler expects {expected} arguments, got {found}")]
    Arity {
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        found: usize,
    },

    /// An argument could not be decoded into its parameter type.
    #[error("argument {index} is not a valid {expected}: {message}")]
    Argument {
        /// Position of the argument.
        index: usize,
        /// Declared parameter type.
        expected: &'static str,
        /// Decoder message.
        message: String,
    },

    /// A return value could not be encoded.
    #[error("return value could not be encoded: {message}")]
    Return {
        /// Encoder message.
        message: String,
    },

    /// The handler panicked.
    #[error("handler panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Errors loading a [`BusConfig`](crate::BusConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    ParseError {
        /// Path of the file, or `<inline>`.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// The config parsed but holds an unusable value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BusError::HandlerCountMismatch {
            topic: "greet".to_string(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "topic greet has the wrong number of handlers (expected 1, actual 2)"
        );

        let err = BusError::Timeout {
            topic: "slow".to_string(),
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "handler for topic slow timed out after 50ms");
    }

    #[test]
    fn test_invoke_error_display() {
        let err = InvokeError::Arity {
            expected: 2,
            found: 1,
        };
        assert_eq!(err.to_string(), "handler expects 2 arguments, got 1");
    }
}
