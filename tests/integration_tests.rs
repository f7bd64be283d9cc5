//! End-to-End HTTP Tests against `SQLite`
//!
//! Requests go through the real router, dispatcher and `SQLite` engine:
//! - `/{resource}/{action}` resolution and case handling
//! - views returned as JSON arrays in column order
//! - error bodies and status codes
//! - health and service info endpoints
//! - MCP tools exposed under `/api/tools`
//!
//! Each test gets its own temporary database file.

#![cfg(feature = "sqlite")]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use sqlgate::engine::sqlite::SqliteEngine;
use sqlgate::{Capabilities, ConnectionConfig, Dispatcher, GatewayConfig};

// ============================================================================
// Test Helpers
// ============================================================================

/// Create a test `SQLite` database with a table and a few views
fn create_test_db() -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let thread_id = std::thread::current().id();
    let temp_file = std::env::temp_dir().join(format!("sqlgate_integration_{thread_id:?}_{id}.db"));
    let _ = std::fs::remove_file(&temp_file);

    let conn = rusqlite::Connection::open(&temp_file).expect("Failed to create temp database");
    conn.execute_batch(
        "CREATE TABLE databases (id INTEGER PRIMARY KEY, name TEXT NOT NULL, state TEXT);
         INSERT INTO databases (name, state) VALUES
             ('master', 'ONLINE'), ('msdb', 'ONLINE'), ('archive', NULL);
         CREATE VIEW databasesList AS SELECT id, name, state FROM databases ORDER BY id;
         CREATE VIEW emptyList AS SELECT id, name FROM databases WHERE 0;
         CREATE VIEW reports AS SELECT 'daily' AS report;",
    )
    .expect("Failed to create fixture");

    temp_file
}

fn cleanup_db(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
}

fn app_with(path: &PathBuf, configure: impl FnOnce(GatewayConfig) -> GatewayConfig) -> Router {
    let config = configure(GatewayConfig::new(ConnectionConfig::sqlite(path.clone())));
    let dispatcher = Dispatcher::<SqliteEngine>::new(config).expect("valid gateway config");
    sqlgate::http::router(Arc::new(dispatcher))
}

fn app(path: &PathBuf) -> Router {
    app_with(path, |config| config)
}

async fn send(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .expect("valid request");
    respond(app, request).await
}

async fn send_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request");
    respond(app, request).await
}

async fn respond(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("readable body");
    let value = serde_json::from_slice(&bytes).expect("response body is JSON");
    (status, value)
}

// ============================================================================
// Invocation
// ============================================================================

#[tokio::test]
async fn test_get_view_returns_rows() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/databases/list", "").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"id": 1, "name": "master", "state": "ONLINE"},
            {"id": 2, "name": "msdb", "state": "ONLINE"},
            {"id": 3, "name": "archive", "state": null},
        ])
    );

    cleanup_db(&db);
}

#[tokio::test]
async fn test_columns_keep_cursor_order() {
    let db = create_test_db();

    let (_, body) = send(app(&db), "GET", "/databases/list", "").await;
    let keys: Vec<&String> = body[0].as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["id", "name", "state"]);

    cleanup_db(&db);
}

#[tokio::test]
async fn test_empty_view_is_empty_array() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/empty/list", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    cleanup_db(&db);
}

#[tokio::test]
async fn test_resource_only_route() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/reports", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"report": "daily"}]));

    cleanup_db(&db);
}

#[tokio::test]
async fn test_sqlite_names_match_case_insensitively() {
    let db = create_test_db();

    // Resolves to "DATABASESList", matched by the catalog's NOCASE collation
    let (status, body) = send(app(&db), "GET", "/DATABASES/list", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(3));

    cleanup_db(&db);
}

#[tokio::test]
async fn test_post_with_malformed_body_is_ignored() {
    let db = create_test_db();

    for body in ["", "not json", "[1, 2]", "42"] {
        let (status, value) = send(app(&db), "POST", "/databases/list", body).await;
        assert_eq!(status, StatusCode::OK, "body {body:?}");
        assert_eq!(value.as_array().map(Vec::len), Some(3));
    }

    cleanup_db(&db);
}

#[tokio::test]
async fn test_max_rows_capability() {
    let db = create_test_db();
    let app = app_with(&db, |config| {
        config.with_capabilities(Capabilities { max_rows: Some(2), ..Capabilities::default() })
    });

    let (status, body) = send(app, "GET", "/databases/list", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));

    cleanup_db(&db);
}

#[tokio::test]
async fn test_slow_view_is_cut_off_by_timeout() {
    let db = create_test_db();
    {
        let conn = rusqlite::Connection::open(&db).expect("Failed to open fixture");
        conn.execute_batch(
            "CREATE VIEW slowList AS
                 WITH RECURSIVE counter(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM counter WHERE x < 2000000000)
                 SELECT count(*) AS total FROM counter;",
        )
        .expect("Failed to create slow view");
    }

    let app = app_with(&db, |config| {
        config.with_capabilities(Capabilities { timeout_ms: Some(50), ..Capabilities::default() })
    });

    let started = std::time::Instant::now();
    let (status, body) = send(app, "GET", "/slow/list", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "EXECUTION_FAILED");
    assert!(body["detail"].as_str().unwrap().contains("timed out after 50 ms"));
    assert!(started.elapsed() < std::time::Duration::from_secs(5));

    cleanup_db(&db);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_unknown_object_is_404() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/unknownThing/list", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({"detail": "SQL object 'main.unknownThingList' not found", "code": "NOT_FOUND"})
    );

    cleanup_db(&db);
}

#[tokio::test]
async fn test_tables_are_not_invocable() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/databases", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    cleanup_db(&db);
}

#[tokio::test]
async fn test_injection_in_path_is_rejected() {
    let db = create_test_db();

    for uri in [
        "/databases/list%3Bdrop",
        "/databases/list%20--",
        "/data%27bases/list",
        "/databases/li%5Bst",
    ] {
        let (status, body) = send(app(&db), "GET", uri, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri {uri}");
        assert_eq!(body["code"], "INVALID_IDENTIFIER");
    }

    // Nothing was dropped
    let (_, body) = send(app(&db), "GET", "/databases/list", "").await;
    assert_eq!(body.as_array().map(Vec::len), Some(3));

    cleanup_db(&db);
}

#[tokio::test]
async fn test_invalid_parameter_name_is_rejected() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/databases/list?x%3B1=2", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_IDENTIFIER");

    cleanup_db(&db);
}

#[tokio::test]
async fn test_engine_errors_are_500_and_redactable() {
    let db = create_test_db();

    // Views take no arguments in SQLite
    let (status, body) = send(app(&db), "POST", "/databases/list", r#"{"name": "msdb"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "EXECUTION_FAILED");
    assert_ne!(body["detail"], "SQL execution failed");

    let redacted = app_with(&db, |mut config| {
        config.redact_errors = true;
        config
    });
    let (status, body) = send(redacted, "POST", "/databases/list", r#"{"name": "msdb"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"detail": "SQL execution failed", "code": "EXECUTION_FAILED"}));

    cleanup_db(&db);
}

// ============================================================================
// Service Endpoints
// ============================================================================

#[tokio::test]
async fn test_health_reports_database() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/health", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].as_str().unwrap().starts_with("3."));
    assert!(body.get("error").is_none());

    cleanup_db(&db);
}

#[tokio::test]
async fn test_health_unavailable_database() {
    let missing = PathBuf::from("/nonexistent/sqlgate/missing.db");

    let (status, body) = send(app(&missing), "GET", "/health", "").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert!(body["error"].as_str().unwrap().contains("Failed to open SQLite database"));
}

#[tokio::test]
async fn test_unavailable_database_on_invoke_is_503() {
    let missing = PathBuf::from("/nonexistent/sqlgate/missing.db");

    let (status, body) = send(app(&missing), "GET", "/databases/list", "").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "CONNECTION_FAILED");
}

#[tokio::test]
async fn test_service_info() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "sqlgate");
    assert_eq!(body["engine"], "sqlite");
    assert_eq!(body["schema"], "main");
    assert_eq!(body["read_only"], true);

    cleanup_db(&db);
}

// ============================================================================
// Tools over HTTP
// ============================================================================

#[tokio::test]
async fn test_http_tools_list() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/api/tools/list", "").await;
    assert_eq!(status, StatusCode::OK);

    let names: Vec<&str> =
        body["tools"].as_array().unwrap().iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(names, vec!["databasesList", "emptyList", "reports"]);
    assert_eq!(body["tools"][0]["inputSchema"]["type"], "object");

    cleanup_db(&db);
}

#[tokio::test]
async fn test_http_tools_call_by_body() {
    let db = create_test_db();

    let (status, body) =
        send_json(app(&db), "/api/tools/call", json!({"toolName": "reports", "arguments": {}})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"report": "daily"}]));

    // Tool names are matched like path names
    let (status, body) = send_json(app(&db), "/api/tools/call", json!({"name": "DATABASESLIST"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(3));

    cleanup_db(&db);
}

#[tokio::test]
async fn test_http_tools_call_errors() {
    let db = create_test_db();

    let (status, body) = send_json(app(&db), "/api/tools/call", json!({"arguments": {}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"detail": "Invalid input: toolName is required", "code": "INVALID_INPUT"}));

    let (status, body) = send(app(&db), "POST", "/api/tools/call", "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, body) = send_json(app(&db), "/api/tools/call", json!({"toolName": "missingList"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "SQL object 'main.missingList' not found");

    let (status, body) = send_json(app(&db), "/api/tools/call", json!({"toolName": "reports;--"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_IDENTIFIER");

    cleanup_db(&db);
}

#[tokio::test]
async fn test_http_tools_call_by_name() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/api/tools/call/databasesList", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[1]["name"], "msdb");

    let (status, body) = send(app(&db), "GET", "/api/tools/call/nothingHere", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    cleanup_db(&db);
}

#[tokio::test]
async fn test_http_tools_connection_test() {
    let db = create_test_db();

    let (status, body) = send(app(&db), "GET", "/api/tools/connection-test", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let missing = PathBuf::from("/nonexistent/sqlgate/missing.db");
    let (status, body) = send(app(&missing), "GET", "/api/tools/connection-test", "").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");

    cleanup_db(&db);
}

#[tokio::test]
async fn test_list_objects_for_mcp() {
    let db = create_test_db();
    let dispatcher =
        Dispatcher::<SqliteEngine>::new(GatewayConfig::new(ConnectionConfig::sqlite(db.clone()))).unwrap();

    let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
    let response = sqlgate::mcp::handle_line(&dispatcher, line).await.unwrap().unwrap();
    let value: Value = serde_json::from_str(&response).unwrap();

    let names: Vec<&str> =
        value["result"]["tools"].as_array().unwrap().iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(names, vec!["databasesList", "emptyList", "reports"]);

    let call = r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"reports","arguments":{}}}"#;
    let response = sqlgate::mcp::handle_line(&dispatcher, call).await.unwrap().unwrap();
    let value: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(value["result"]["isError"], false);
    let text = value["result"]["content"][0]["text"].as_str().unwrap();
    assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!([{"report": "daily"}]));

    cleanup_db(&db);
}
