//! Invocation Capabilities
//!
//! Decides which object kinds may be invoked with which request method, and
//! carries the per-server limits applied to every invocation.
//!
//! # Policy
//! - GET invokes views, table functions and scalar functions.
//! - POST invokes every kind; procedures additionally require `allow_write`.
//! - Everything defaults to the most restrictive setting (read-only).
//!
//! Checks run after classification and before any call plan is executed.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::{ObjectKind, Row};
use crate::error::{GateError, Result};

/// Request method of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-wide invocation capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Allow procedure execution (procedures may write)
    /// Default: false (read-only)
    #[serde(default)]
    pub allow_write: bool,

    /// Maximum number of rows returned from a row set
    /// None means no limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,

    /// Execution timeout in milliseconds
    /// None means no timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Capabilities {
    /// Create read-only capabilities (default)
    #[must_use]
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Create write-enabled capabilities
    #[must_use]
    pub fn with_write() -> Self {
        Self { allow_write: true, ..Default::default() }
    }

    #[must_use]
    pub const fn can_write(&self) -> bool {
        self.allow_write
    }
}

/// Check that `kind` may be invoked with `method` under `caps`
///
/// `Unknown` is never checked here; it is rejected as not found earlier.
pub fn check_invocation(method: Method, kind: ObjectKind, caps: &Capabilities) -> Result<()> {
    match (method, kind) {
        (_, ObjectKind::Unknown) => Err(GateError::unsupported_kind(
            method.as_str(),
            kind.as_str(),
            "object is not invocable",
        )),
        (Method::Get, ObjectKind::Procedure) => Err(GateError::unsupported_kind(
            method.as_str(),
            kind.as_str(),
            "procedures must be invoked with POST",
        )),
        (Method::Post, ObjectKind::Procedure) if !caps.can_write() => Err(
            GateError::unsupported_kind(method.as_str(), kind.as_str(), "server is read-only"),
        ),
        _ => Ok(()),
    }
}

/// Truncate `rows` to `max_rows`, logging when rows are dropped
pub fn apply_row_limit(rows: &mut Vec<Row>, caps: &Capabilities, object: &str) {
    if let Some(max_rows) = caps.max_rows {
        if rows.len() > max_rows {
            warn!(object, returned = rows.len(), max_rows, "Row set truncated");
            rows.truncate(max_rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ_KINDS: [ObjectKind; 3] =
        [ObjectKind::View, ObjectKind::TableFunction, ObjectKind::ScalarFunction];

    #[test]
    fn test_capabilities_defaults() {
        let caps = Capabilities::default();
        assert!(!caps.allow_write);
        assert!(caps.max_rows.is_none());
        assert!(caps.timeout_ms.is_none());
        assert_eq!(caps, Capabilities::read_only());
    }

    #[test]
    fn test_get_allows_read_kinds() {
        for kind in READ_KINDS {
            assert!(check_invocation(Method::Get, kind, &Capabilities::read_only()).is_ok());
        }
    }

    #[test]
    fn test_get_rejects_procedures_even_with_write() {
        let err =
            check_invocation(Method::Get, ObjectKind::Procedure, &Capabilities::with_write()).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "UNSUPPORTED_KIND_FOR_METHOD");
        assert!(err.message().contains("POST"));
    }

    #[test]
    fn test_post_procedure_requires_write() {
        let err = check_invocation(Method::Post, ObjectKind::Procedure, &Capabilities::read_only())
            .unwrap_err();
        assert!(err.message().contains("server is read-only"));

        assert!(check_invocation(Method::Post, ObjectKind::Procedure, &Capabilities::with_write()).is_ok());
    }

    #[test]
    fn test_post_allows_read_kinds() {
        for kind in READ_KINDS {
            assert!(check_invocation(Method::Post, kind, &Capabilities::read_only()).is_ok());
        }
    }

    #[test]
    fn test_unknown_is_rejected() {
        assert!(check_invocation(Method::Post, ObjectKind::Unknown, &Capabilities::with_write()).is_err());
    }

    #[test]
    fn test_row_limit() {
        let mut rows: Vec<Row> = (0..5)
            .map(|i| {
                let mut row = Row::new();
                row.insert("i".to_string(), serde_json::json!(i));
                row
            })
            .collect();

        apply_row_limit(&mut rows, &Capabilities::default(), "pupy.x");
        assert_eq!(rows.len(), 5);

        let caps = Capabilities { max_rows: Some(2), ..Default::default() };
        apply_row_limit(&mut rows, &caps, "pupy.x");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["i"], serde_json::json!(1));
    }

    #[test]
    fn test_method_serialization() {
        assert_eq!(serde_json::to_string(&Method::Get).unwrap(), r#""GET""#);
        assert_eq!(Method::Post.to_string(), "POST");
    }
}
