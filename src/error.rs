//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout sqlgate.
//! Every error maps to a stable error code and an HTTP status class so the
//! dispatcher can translate failures into `{"detail": ..., "code": ...}` bodies.
//!
//! # Error Categories
//! - `InvalidIdentifier`: a schema, object or parameter name is not a bare identifier
//! - `NotFound`: the resolved object does not exist in the catalog
//! - `UnsupportedKindForMethod`: the object kind cannot be invoked with this HTTP method
//! - `ExecutionFailed`: the database rejected or failed the constructed call
//! - `InvalidResponsePayload`: a strict JSON payload did not parse
//! - `ConnectionFailed`: the database (or its catalog) could not be reached
//! - `InvalidInput`: malformed input or missing required parameters
//! - `EngineError`: engine-specific failure outside a call (row decoding, etc.)
//! - `ConfigError`: configuration file or connection registry errors

use thiserror::Error;

/// Main error type for sqlgate operations
#[derive(Error, Debug)]
pub enum GateError {
    /// Identifier failed validation and must not reach SQL text
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Classification found no invocable object
    #[error("{0}")]
    NotFound(String),

    /// Object kind cannot be invoked with the request method or capabilities
    #[error("{method} is not supported for {kind}: {reason}")]
    UnsupportedKindForMethod { method: String, kind: String, reason: String },

    /// Database rejected or failed the call
    #[error("SQL execution error: {0}")]
    ExecutionFailed(String),

    /// Text result that was required to be JSON did not parse
    #[error("Invalid JSON returned from {object}: {detail}")]
    InvalidResponsePayload { object: String, detail: String },

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GateError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling by clients.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            Self::NotFound(_) => "NOT_FOUND",
            Self::UnsupportedKindForMethod { .. } => "UNSUPPORTED_KIND_FOR_METHOD",
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::InvalidResponsePayload { .. } => "INVALID_RESPONSE_PAYLOAD",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// HTTP status code this error is reported with
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidIdentifier(_)
            | Self::UnsupportedKindForMethod { .. }
            | Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::ExecutionFailed(_)
            | Self::InvalidResponsePayload { .. }
            | Self::EngineError { .. }
            | Self::ConfigError(_) => 500,
            Self::ConnectionFailed(_) => 503,
        }
    }

    /// Whether the message may carry raw engine text
    ///
    /// Deployments with `redact_errors` replace these messages with a generic one.
    #[must_use]
    pub const fn carries_engine_detail(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFailed(_)
                | Self::InvalidResponsePayload { .. }
                | Self::EngineError { .. }
                | Self::ConnectionFailed(_)
        )
    }

    /// Get human-readable error message
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::InvalidIdentifier(message.into())
    }

    /// Create a not-found error for a qualified object name
    pub fn not_found(schema: &str, name: &str) -> Self {
        Self::NotFound(format!("SQL object '{schema}.{name}' not found"))
    }

    /// Create an unsupported kind/method error
    pub fn unsupported_kind(
        method: impl Into<String>,
        kind: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnsupportedKindForMethod {
            method: method.into(),
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create an execution failed error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    /// Create an invalid response payload error
    pub fn invalid_response_payload(object: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidResponsePayload { object: object.into(), detail: detail.into() }
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for sqlgate operations
pub type Result<T> = std::result::Result<T, GateError>;
