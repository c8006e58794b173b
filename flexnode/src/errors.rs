//! Error types used across the flexnode runtime.

use crate::bootstrap::ExecutionResult;
use thiserror::Error;

/// Result type for flexnode operations.
pub type FlexnodeResult<T> = Result<T, FlexnodeError>;

#[derive(Debug, Error)]
pub enum FlexnodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("download error: {0}")]
    Download(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("Azure Arc error: {0}")]
    Arc(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("operation cancelled")]
    Cancelled,

    /// Fail-fast run halted. Carries the partial execution result so callers
    /// keep both the error and the step outcomes collected before the halt.
    #[error("{}", bootstrap_failure_message(.0))]
    BootstrapFailed(Box<ExecutionResult>),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn bootstrap_failure_message(result: &ExecutionResult) -> String {
    match &result.error {
        Some(message) => message.clone(),
        None => "bootstrap failed".to_string(),
    }
}

impl From<serde_json::Error> for FlexnodeError {
    fn from(err: serde_json::Error) -> Self {
        FlexnodeError::Internal(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for FlexnodeError {
    fn from(err: reqwest::Error) -> Self {
        FlexnodeError::Download(err.to_string())
    }
}

impl From<String> for FlexnodeError {
    fn from(err: String) -> Self {
        FlexnodeError::Internal(err)
    }
}

impl From<&str> for FlexnodeError {
    fn from(err: &str) -> Self {
        FlexnodeError::Internal(err.to_string())
    }
}
