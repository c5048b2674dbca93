//! Error taxonomy
//!
//! Two separate channels: `ProviderError` covers registry and provider
//! failures, which the agent folds back into the conversation as
//! error-flagged tool results. `CompletionError` covers upstream model
//! failures, which abort the chat session and propagate to the caller.

use thiserror::Error;

/// Errors raised by capability providers and the registry.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No registered provider publishes this operation.
    #[error("operation not found: {0}")]
    OperationNotFound(String),

    /// No registered provider publishes this resource URI.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Required parameters are missing or malformed.
    #[error("invalid arguments for {operation}: {message}")]
    InvalidArguments { operation: String, message: String },

    /// Domain-level failure inside a provider (e.g. record not found).
    #[error("{0}")]
    Execution(String),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Shorthand for argument-validation failures.
    pub fn invalid_arguments(operation: &str, message: impl ToString) -> Self {
        Self::InvalidArguments {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

/// Fatal errors from the completion provider. Never recovered locally.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed completion response: {0}")]
    Malformed(String),

    #[error("completion stream error: {0}")]
    Stream(String),
}
