//! Error types for the Strimzi Registry Operator
//!
//! Errors fall into two tiers: retryable conditions that the event-delivery
//! mechanism should re-deliver after a delay, and everything else, which will
//! not resolve by retrying with the same inputs.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Requeue delay for retryable errors that do not suggest their own delay
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Requeue delay for transient Kubernetes API failures
const KUBE_API_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Transient or recoverable condition; re-deliver after `delay`
    #[error("Temporary error: {message}")]
    Retryable {
        message: String,
        delay: Option<Duration>,
    },

    /// Condition that encodes a configuration problem rather than a timing problem
    #[error("Permanent error: {0}")]
    Fatal(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeApi(String),

    /// Resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid resource state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl OperatorError {
    /// Build a retryable error without a suggested delay
    pub fn retryable(message: impl Into<String>) -> Self {
        OperatorError::Retryable {
            message: message.into(),
            delay: None,
        }
    }

    /// Build a retryable error with a suggested delay in seconds
    pub fn retryable_after(message: impl Into<String>, secs: u64) -> Self {
        OperatorError::Retryable {
            message: message.into(),
            delay: Some(Duration::from_secs(secs)),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::Retryable { .. } | OperatorError::KubeApi(_)
        )
    }

    /// Get the requeue delay for retryable errors
    pub fn requeue_delay(&self) -> Option<Duration> {
        match self {
            OperatorError::Retryable { delay, .. } => Some(delay.unwrap_or(DEFAULT_RETRY_DELAY)),
            OperatorError::KubeApi(_) => Some(KUBE_API_RETRY_DELAY),
            _ => None,
        }
    }
}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        OperatorError::KubeApi(err.to_string())
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}
