//! Error types for the mail triage service.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox and sender failures.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Mailbox connection to {host} failed: {reason}")]
    ConnectFailed { host: String, reason: String },

    #[error("Mailbox login failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("No active mailbox session")]
    NotConnected,

    #[error("IMAP command {command} rejected: {response}")]
    CommandRejected { command: String, response: String },

    #[error("Mailbox protocol error: {0}")]
    Protocol(String),

    #[error("Failed to send email: {reason}")]
    SendFailed { reason: String },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking task failed: {0}")]
    Task(String),
}

/// Classification-service failures.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} connection failed: {reason}")]
    ConnectionFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} rejected the request: {reason}")]
    InvalidRequest { provider: String, reason: String },

    #[error("Provider {provider} service error: {reason}")]
    ServiceError { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },
}

impl LlmError {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Only timeouts, connection failures and rate limiting qualify. Service
    /// errors are deliberately not retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout { .. } | LlmError::ConnectionFailed { .. } | LlmError::RateLimited { .. }
        )
    }
}

/// Per-message processing failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mailbox operation failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("Message {uid} processing panicked: {reason}")]
    Panicked { uid: String, reason: String },
}
