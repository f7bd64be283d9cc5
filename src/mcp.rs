//! MCP (Model Context Protocol) Server
//!
//! This module implements an MCP server using manual JSON-RPC 2.0 over stdio.
//! Every invocable object in the exposed schema becomes one tool, named by
//! its canonical object name (e.g. `databasesList`).
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (line-based)
//! - **Dependencies**: Only `serde_json` and anyhow (no MCP-specific crates)
//! - **Invocation**: `tools/call` goes through the same [`Dispatcher`] as HTTP,
//!   with POST semantics
//!
//! # Usage
//!
//! Start the MCP server with: `sqlgate mcp --engine sqlite --file app.db`
//!
//! Configure in an MCP client:
//! ```json
//! {
//!   "mcpServers": {
//!     "sqlgate": {
//!       "command": "sqlgate",
//!       "args": ["mcp", "--connection", "prod"]
//!     }
//!   }
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};

use crate::capability::Method;
use crate::dispatch::Dispatcher;
use crate::engine::{DatabaseEngine, ObjectDescriptor};
use crate::error::GateError;
use crate::output::ErrorBody;
use crate::params::ParameterBag;
use crate::strategy::RESPONSE_PARAMETER;

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INTERNAL_ERROR: i32 = -32603;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Failure of a protocol method, carrying its JSON-RPC code
struct MethodError {
    code: i32,
    error: anyhow::Error,
}

impl From<anyhow::Error> for MethodError {
    fn from(error: anyhow::Error) -> Self {
        Self { code: INTERNAL_ERROR, error }
    }
}

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

/// Text content block for MCP tool results
#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

impl TextContent {
    fn new(text: String) -> Self {
        Self { content_type: "text".to_string(), text }
    }
}

/// MCP tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    /// Successful tool result with the normalized JSON as text
    fn success(data: &Value) -> Result<Value> {
        let json_text = serde_json::to_string_pretty(data)?;
        let result = Self { content: vec![TextContent::new(json_text)], is_error: false };
        Ok(serde_json::to_value(result)?)
    }

    /// Tool-level failure; the JSON-RPC call itself succeeds
    fn failure(err: &GateError, redact: bool) -> Result<Value> {
        let json_text = serde_json::to_string_pretty(&ErrorBody::from_error(err, redact))?;
        let result = Self { content: vec![TextContent::new(json_text)], is_error: true };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// MCP Server
// ============================================================================

/// Start the MCP server on stdio
///
/// Each request is a single line of JSON and each response is a single
/// line of JSON. Notifications get no response.
///
/// # Errors
///
/// Returns an error if stdio communication fails.
#[allow(clippy::future_not_send)]
pub async fn serve<E: DatabaseEngine>(dispatcher: Dispatcher<E>) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if let Some(response) = handle_line(&dispatcher, &line).await? {
            writeln!(stdout, "{response}")?;
            stdout.flush()?;
        }
    }

    Ok(())
}

/// Handle one line of input, returning the serialized response if any
pub async fn handle_line<E: DatabaseEngine>(
    dispatcher: &Dispatcher<E>,
    line: &str,
) -> Result<Option<String>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let response = match serde_json::from_str::<JsonRpcRequest>(line) {
        Ok(request) => {
            let is_notification = request.id.is_none() || request.method.starts_with("notifications/");
            let response = handle_request(dispatcher, request).await;
            if is_notification {
                return Ok(None);
            }
            response
        }
        Err(e) => JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {e}")),
    };

    Ok(Some(serde_json::to_string(&response)?))
}

/// Route a request to its handler
async fn handle_request<E: DatabaseEngine>(
    dispatcher: &Dispatcher<E>,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let result = match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "tools/list" => handle_list_tools(dispatcher).await.map_err(MethodError::from),
        "tools/call" => handle_call_tool(dispatcher, request.params).await.map_err(MethodError::from),
        "ping" => Ok(json!({})),
        method if method.starts_with("notifications/") => Ok(Value::Null),
        _ => Err(MethodError {
            code: METHOD_NOT_FOUND,
            error: anyhow!("Unknown method: {}", request.method),
        }),
    };

    match result {
        Ok(value) => JsonRpcResponse::result(request.id, value),
        Err(e) => JsonRpcResponse::error(request.id, e.code, e.error.to_string()),
    }
}

// ============================================================================
// MCP Protocol Handlers
// ============================================================================

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "sqlgate",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// One tool per invocable object in the exposed schema
async fn handle_list_tools<E: DatabaseEngine>(dispatcher: &Dispatcher<E>) -> Result<Value> {
    let tools = tool_definitions(dispatcher)
        .await
        .map_err(|e| anyhow!("Failed to list objects: {e}"))?;
    Ok(json!({ "tools": tools }))
}

/// Tool definitions for every invocable object, shared with the HTTP tools routes
pub(crate) async fn tool_definitions<E: DatabaseEngine>(
    dispatcher: &Dispatcher<E>,
) -> crate::error::Result<Vec<Value>> {
    Ok(dispatcher.list_objects().await?.iter().map(tool_definition).collect())
}

/// Tool definition for one object
fn tool_definition(object: &ObjectDescriptor) -> Value {
    let mut properties = serde_json::Map::new();
    for param in object.input_parameters() {
        if param.name.eq_ignore_ascii_case(RESPONSE_PARAMETER) {
            continue;
        }
        properties.insert(
            param.name.clone(),
            json!({
                "type": json_schema_type(&param.type_name),
                "description": format!("{} parameter", param.type_name),
            }),
        );
    }

    json!({
        "name": object.name,
        "description": format!("{} {}", object.kind, object.qualified_name()),
        "inputSchema": {
            "type": "object",
            "properties": properties,
            // Undeclared keys are still passed through
            "additionalProperties": true,
        }
    })
}

/// JSON Schema type for a declared SQL parameter type
fn json_schema_type(sql_type: &str) -> &'static str {
    let lowered = sql_type.to_ascii_lowercase();
    match lowered.as_str() {
        "bit" | "boolean" | "bool" => "boolean",
        "tinyint" | "smallint" | "int" | "integer" | "bigint" | "int2" | "int4" | "int8" => "integer",
        "real" | "float" | "double precision" | "decimal" | "numeric" | "money" | "smallmoney" => {
            "number"
        }
        "json" | "jsonb" => "object",
        _ => "string",
    }
}

/// Invoke an object by canonical name with POST semantics
async fn handle_call_tool<E: DatabaseEngine>(
    dispatcher: &Dispatcher<E>,
    params: Option<Value>,
) -> Result<Value> {
    let params = params.ok_or_else(|| anyhow!("Missing params"))?;
    let name = params["name"].as_str().ok_or_else(|| anyhow!("Missing tool name"))?;

    let mut bag = ParameterBag::new();
    match &params["arguments"] {
        Value::Object(arguments) => bag.merge_json_object(arguments.clone()),
        Value::Null => {}
        _ => return Err(anyhow!("Tool arguments must be an object")),
    }

    match dispatcher.invoke_object(Method::Post, name, &bag).await {
        Ok(value) => CallToolResult::success(&value),
        Err(err) => CallToolResult::failure(&err, dispatcher.config().redact_errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ObjectKind, ParameterInfo};

    fn descriptor() -> ObjectDescriptor {
        ObjectDescriptor::new("pupy", "databasesGet", ObjectKind::ScalarFunction).with_parameters(vec![
            ParameterInfo { name: "databaseName".to_string(), type_name: "nvarchar".to_string(), is_output: false },
            ParameterInfo { name: "limit".to_string(), type_name: "int".to_string(), is_output: false },
            ParameterInfo { name: "response".to_string(), type_name: "nvarchar".to_string(), is_output: true },
        ])
    }

    #[test]
    fn test_tool_definition() {
        let tool = tool_definition(&descriptor());

        assert_eq!(tool["name"], "databasesGet");
        assert_eq!(tool["description"], "scalar_function pupy.databasesGet");
        assert_eq!(tool["inputSchema"]["properties"]["databaseName"]["type"], "string");
        assert_eq!(tool["inputSchema"]["properties"]["limit"]["type"], "integer");
        assert!(tool["inputSchema"]["properties"].get("response").is_none());
    }

    #[test]
    fn test_json_schema_type() {
        assert_eq!(json_schema_type("BIT"), "boolean");
        assert_eq!(json_schema_type("bigint"), "integer");
        assert_eq!(json_schema_type("numeric"), "number");
        assert_eq!(json_schema_type("jsonb"), "object");
        assert_eq!(json_schema_type("uniqueidentifier"), "string");
    }

    #[test]
    fn test_initialize_reports_server_info() {
        let value = handle_initialize();
        assert_eq!(value["serverInfo"]["name"], "sqlgate");
        assert!(value["capabilities"]["tools"].is_object());
    }

    #[test]
    fn test_tool_failure_is_error_result() {
        let value = CallToolResult::failure(&GateError::not_found("pupy", "nope"), false).unwrap();
        assert_eq!(value["isError"], true);
        assert!(value["content"][0]["text"].as_str().unwrap().contains("NOT_FOUND"));
    }
}
