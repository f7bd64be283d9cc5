//! JSON Output Types
//!
//! Two output contracts live here:
//!
//! - HTTP error bodies: `{"detail": "...", "code": "..."}`. Successful HTTP
//!   responses carry the normalized result directly, without an envelope.
//! - CLI envelopes for `sqlgate connect`:
//!   `{"ok": true, "engine": "...", "command": "...", "data": {...}, "meta": {...}}` or
//!   `{"ok": false, "engine": "...", "command": "...", "error": {"code": "...", "message": "..."}}`

use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Error body returned by the HTTP surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message
    pub detail: String,

    /// Stable error code (e.g., "NOT_FOUND")
    pub code: String,
}

impl ErrorBody {
    /// Build the body for an error
    ///
    /// With `redact` set, messages that may carry raw engine text are replaced
    /// by a generic one. The caller is expected to log the original.
    #[must_use]
    pub fn from_error(err: &GateError, redact: bool) -> Self {
        let detail = if redact && err.carries_engine_detail() {
            match err {
                GateError::ConnectionFailed(_) => "Database is unavailable".to_string(),
                _ => "SQL execution failed".to_string(),
            }
        } else {
            err.message()
        };

        Self { detail, code: err.error_code().to_string() }
    }
}

/// Success envelope for CLI operation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Database engine used for this operation (mssql, postgres, sqlite)
    pub engine: String,

    /// Command that was executed
    pub command: String,

    /// Operation-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    /// Create a new success envelope
    pub fn new(engine: impl Into<String>, command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, engine: engine.into(), command: command.into(), data, meta }
    }
}

/// Error envelope for CLI operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Database engine (empty string if not engine-specific)
    pub engine: String,

    /// Command that was attempted
    pub command: String,

    /// Error information
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    /// Create a new error envelope
    pub fn new(engine: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, engine: engine.into(), command: command.into(), error }
    }

    /// Create error envelope from `GateError`
    pub fn from_error(engine: impl Into<String>, command: impl Into<String>, err: &GateError) -> Self {
        Self::new(
            engine,
            command,
            ErrorInfo { code: err.error_code().to_string(), message: err.message() },
        )
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error info
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in CLI success envelopes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,
}

impl Metadata {
    /// Create new metadata with execution time
    pub fn new(execution_ms: u64) -> Self {
        Self { execution_ms }
    }
}

/// Health report served on `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// "healthy" or "unhealthy"
    pub status: String,

    /// Connected database name (healthy only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Server version string (healthy only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Failure description (unhealthy only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(database: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            database: Some(database.into()),
            version: Some(version.into()),
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self { status: "unhealthy".to_string(), database: None, version: None, error: Some(error.into()) }
    }
}
