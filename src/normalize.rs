//! Response Normalization
//!
//! Turns an [`InvocationResult`] into the JSON body returned to callers:
//! row sets become an array of objects, text results are parsed as JSON.

use serde_json::{json, Value};
use tracing::warn;

use crate::engine::{InvocationResult, ObjectDescriptor, ObjectKind};
use crate::error::{GateError, Result};

/// How text results that are not JSON are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponsePolicy {
    /// Fail procedure calls whose `response` output is not valid JSON
    pub strict_procedure_json: bool,
}

/// Normalize a raw invocation result for `object`
///
/// - rows: JSON array of row objects, in cursor order
/// - null, empty or blank text: JSON `null`
/// - JSON text: the parsed value
/// - anything else: `{"result": text}`, unless the object is a procedure and
///   `strict_procedure_json` is set
pub fn normalize(
    result: InvocationResult,
    object: &ObjectDescriptor,
    policy: ResponsePolicy,
) -> Result<Value> {
    match result {
        InvocationResult::Rows(rows) => Ok(Value::Array(rows.into_iter().map(Value::Object).collect())),
        InvocationResult::Text(None) => Ok(Value::Null),
        InvocationResult::Text(Some(text)) if text.trim().is_empty() => Ok(Value::Null),
        InvocationResult::Text(Some(text)) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => Ok(parsed),
            Err(e) if policy.strict_procedure_json && object.kind == ObjectKind::Procedure => {
                Err(GateError::invalid_response_payload(object.qualified_name(), e.to_string()))
            }
            Err(e) => {
                warn!(
                    object = %object.qualified_name(),
                    error = %e,
                    "Result is not JSON, wrapping as {{\"result\": ...}}"
                );
                Ok(json!({ "result": text }))
            }
        },
    }
}
