// logsift/src/error.rs
//
// Error taxonomy.
//
// Nothing in the analytical core is fatal: parse errors skip one line,
// notifier and state errors are logged by their callers. Only ConfigError
// aborts, and only at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn one raw log line into an input record.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The line is malformed. Logged at info and skipped.
    #[error("failed to parse line {line}: {message}")]
    Line { line: u64, message: String },

    /// The line is well-formed but carries nothing worth processing
    /// (e.g. an internal non-query message). Logged at debug.
    #[error("skipping line {line}: {message}")]
    Minor { line: u64, message: String },
}

impl ParseError {
    pub fn line(line: u64, message: impl Into<String>) -> Self {
        Self::Line { line, message: message.into() }
    }

    pub fn minor(line: u64, message: impl Into<String>) -> Self {
        Self::Minor { line, message: message.into() }
    }

    pub fn is_minor(&self) -> bool {
        matches!(self, Self::Minor { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("logFiles must not be empty")]
    NoLogFiles,

    #[error("log file {src}: {message}")]
    Invalid { src: String, message: String },
}

impl ConfigError {
    pub fn invalid(src: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid { src: src.into(), message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("notification encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("notifier timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("state file {path} is not valid JSON: {source}")]
    Decode { path: PathBuf, source: serde_json::Error },

    #[error("state encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{expected} transformer received a {got} record")]
    WrongRecordType { expected: &'static str, got: &'static str },
}
