//! `SQLite` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `SQLite` databases.
//!
//! # Features
//! - File-based connections (`/path/to/db.sqlite`)
//! - In-memory connections (`:memory:`)
//! - Views classified via `sqlite_master`; attached databases act as schemas
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver); calls run on tokio's blocking pool
//! - Connections are opened read-only; only views are invocable
//! - Name matching is case-insensitive, like `SQLite` itself
//! - BLOB data is Base64-encoded for JSON safety

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};

use crate::engine::{
    CallPlan, ConnectionConfig, ConnectionInfo, DatabaseEngine, DatabaseType, InvocationResult,
    ObjectDescriptor, ObjectKind, ResultShape,
};
use crate::error::{GateError, Result};
use crate::params::ParamValue;
use crate::strategy::dialect::quote;

/// `SQLite` database engine implementation
pub struct SqliteEngine;

impl DatabaseEngine for SqliteEngine {
    const ENGINE: DatabaseType = DatabaseType::SQLite;

    async fn validate_connection(config: &ConnectionConfig) -> Result<ConnectionInfo> {
        let config = config.clone();
        blocking(move || {
            let conn = open_config(&config)?;

            let version: String =
                conn.query_row("SELECT sqlite_version()", [], |row| row.get(0)).map_err(|e| {
                    GateError::connection_failed(format!("Failed to query SQLite version: {e}"))
                })?;

            Ok(ConnectionInfo {
                database_version: version.clone(),
                server_info: format!("SQLite {version}"),
                connected_database: config.database_label(),
                user: "N/A".to_string(), // SQLite has no user concept
            })
        })
        .await
    }

    async fn classify(config: &ConnectionConfig, schema: &str, name: &str) -> Result<ObjectDescriptor> {
        let (config, schema, name) = (config.clone(), schema.to_string(), name.to_string());
        blocking(move || classify_view(&open_config(&config)?, &schema, &name)).await
    }

    async fn list_objects(config: &ConnectionConfig, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let (config, schema) = (config.clone(), schema.to_string());
        blocking(move || list_views(&open_config(&config)?, &schema)).await
    }

    async fn execute(config: &ConnectionConfig, plan: &CallPlan) -> Result<InvocationResult> {
        let conn = open_config(config)?;
        // Dropping this future (request timeout) stops the running statement
        let _interrupt = InterruptOnDrop(conn.get_interrupt_handle());

        let plan = plan.clone();
        blocking(move || run_plan(&conn, &plan)).await
    }
}

/// Run blocking `rusqlite` work off the async worker threads
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| GateError::engine_error("sqlite", format!("Blocking task failed: {e}")))?
}

struct InterruptOnDrop(rusqlite::InterruptHandle);

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        // No-op once the connection has closed
        self.0.interrupt();
    }
}

fn classify_view(conn: &Connection, schema: &str, name: &str) -> Result<ObjectDescriptor> {
    let Some(schema_name) = attached_schema(conn, schema)? else {
        return Ok(ObjectDescriptor::unknown(schema, name));
    };

    let sql = format!(
        "SELECT name FROM {}.sqlite_master WHERE type = 'view' AND name = ?1 COLLATE NOCASE",
        quote(DatabaseType::SQLite, &schema_name)?
    );

    let found: Option<String> = conn
        .query_row(&sql, [name], |row| row.get(0))
        .optional()
        .map_err(|e| GateError::engine_error("sqlite", format!("Catalog lookup failed: {e}")))?;

    Ok(match found {
        Some(view) => ObjectDescriptor::new(schema_name, view, ObjectKind::View),
        None => ObjectDescriptor::unknown(schema, name),
    })
}

fn list_views(conn: &Connection, schema: &str) -> Result<Vec<ObjectDescriptor>> {
    let Some(schema_name) = attached_schema(conn, schema)? else {
        return Ok(Vec::new());
    };

    let sql = format!(
        "SELECT name FROM {}.sqlite_master WHERE type = 'view' ORDER BY name",
        quote(DatabaseType::SQLite, &schema_name)?
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| GateError::engine_error("sqlite", format!("Failed to query views: {e}")))?;

    let names: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| GateError::engine_error("sqlite", format!("Failed to fetch view names: {e}")))?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(|e| GateError::engine_error("sqlite", format!("Failed to collect view names: {e}")))?;

    Ok(names
        .into_iter()
        .map(|name| ObjectDescriptor::new(schema_name.clone(), name, ObjectKind::View))
        .collect())
}

fn run_plan(conn: &Connection, plan: &CallPlan) -> Result<InvocationResult> {
    let mut stmt = conn
        .prepare(&plan.sql)
        .map_err(|e| GateError::execution_failed(format!("Failed to prepare call: {e}")))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    let rows = stmt
        .query(rusqlite::params_from_iter(plan.binds.iter()))
        .map_err(|e| GateError::execution_failed(format!("Failed to execute call: {e}")))?;

    let rows: Vec<crate::engine::Row> = rows
        .mapped(|row| row_to_json(&column_names, row))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| GateError::execution_failed(format!("Failed to fetch row: {e}")))?;

    Ok(match &plan.shape {
        ResultShape::Rows => InvocationResult::Rows(rows),
        ResultShape::Scalar => InvocationResult::Text(first_text(&rows, None)),
        ResultShape::Output { column } => InvocationResult::Text(first_text(&rows, Some(column.as_str()))),
    })
}

fn open_config(config: &ConnectionConfig) -> Result<Connection> {
    config.expect_engine(DatabaseType::SQLite)?;

    let file_path = config
        .file
        .as_ref()
        .ok_or_else(|| GateError::invalid_input("SQLite requires 'file' parameter"))?;

    let path_str = file_path.to_str().ok_or_else(|| {
        GateError::invalid_input("SQLite file path contains invalid UTF-8 characters")
    })?;

    open_connection(path_str)
}

fn open_connection(path: &str) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| GateError::connection_failed(format!("Failed to open SQLite database: {e}")))
}

/// Catalog spelling of an attached database named `schema`, if any
fn attached_schema(conn: &Connection, schema: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM pragma_database_list WHERE name = ?1 COLLATE NOCASE",
        [schema],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| GateError::engine_error("sqlite", format!("Failed to list databases: {e}")))
}

fn first_text(rows: &[crate::engine::Row], column: Option<&str>) -> Option<String> {
    let row = rows.first()?;
    let value = match column {
        Some(column) => row.get(column),
        None => row.values().next(),
    }?;
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Convert a `SQLite` row to a JSON object keyed by column name
fn row_to_json(
    column_names: &[String],
    row: &Row,
) -> std::result::Result<crate::engine::Row, rusqlite::Error> {
    let mut values = crate::engine::Row::new();

    for (idx, name) in column_names.iter().enumerate() {
        values.insert(name.clone(), sqlite_value_to_json(row, idx)?);
    }

    Ok(values)
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(
    row: &Row,
    idx: usize,
) -> std::result::Result<serde_json::Value, rusqlite::Error> {
    let value_ref = row.get_ref(idx)?;

    Ok(match value_ref {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number), // Handle NaN/Infinity as null
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            serde_json::Value::String(text.to_string())
        }
        ValueRef::Blob(b) => {
            // Encode BLOB as Base64 for JSON safety
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(b);
            serde_json::Value::String(encoded)
        }
    })
}

impl rusqlite::ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            Self::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Self::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Temp database with one table and two views
    fn fixture(name: &str) -> std::path::PathBuf {
        let temp_file = std::env::temp_dir().join(format!("sqlgate_sqlite_{name}.db"));
        let _ = std::fs::remove_file(&temp_file);

        let conn = Connection::open(&temp_file).expect("Failed to create temp database");
        conn.execute_batch(
            "CREATE TABLE databases (id INTEGER PRIMARY KEY, name TEXT NOT NULL, size REAL, icon BLOB);
             INSERT INTO databases (name, size, icon) VALUES ('master', 4.5, x'0102'), ('msdb', NULL, NULL);
             CREATE VIEW databasesList AS SELECT id, name, size, icon FROM databases ORDER BY id;
             CREATE VIEW databasesCount AS SELECT COUNT(*) AS total FROM databases;",
        )
        .expect("Failed to create fixture");

        temp_file
    }

    fn view_plan(view: &str) -> CallPlan {
        CallPlan {
            sql: format!(r#"SELECT * FROM "main"."{view}""#),
            binds: Vec::new(),
            shape: ResultShape::Rows,
        }
    }

    #[tokio::test]
    async fn test_validate_connection_memory() {
        let config = ConnectionConfig::sqlite(":memory:".into());
        let info = SqliteEngine::validate_connection(&config).await.unwrap();

        assert!(info.database_version.starts_with("3.")); // SQLite version 3.x
        assert!(info.server_info.contains("SQLite"));
        assert_eq!(info.connected_database, ":memory:");
        assert_eq!(info.user, "N/A");
    }

    #[tokio::test]
    async fn test_validate_connection_wrong_engine() {
        let mut config = ConnectionConfig::sqlite(":memory:".into());
        config.engine = DatabaseType::Postgres;

        let result = SqliteEngine::validate_connection(&config).await;
        assert!(result.unwrap_err().message().contains("Expected sqlite engine"));
    }

    #[tokio::test]
    async fn test_validate_connection_missing_file() {
        let mut config = ConnectionConfig::sqlite(":memory:".into());
        config.file = None;

        let result = SqliteEngine::validate_connection(&config).await;
        assert!(result.unwrap_err().message().contains("SQLite requires 'file' parameter"));
    }

    #[tokio::test]
    async fn test_classify_view_case_insensitive() {
        let temp_file = fixture("classify");
        let config = ConnectionConfig::sqlite(temp_file.clone());

        let object = SqliteEngine::classify(&config, "MAIN", "DATABASESLIST").await.unwrap();
        assert_eq!(object.kind, ObjectKind::View);
        assert_eq!(object.schema, "main");
        assert_eq!(object.name, "databasesList");

        // Tables are not invocable
        let table = SqliteEngine::classify(&config, "main", "databases").await.unwrap();
        assert_eq!(table.kind, ObjectKind::Unknown);

        let missing_schema = SqliteEngine::classify(&config, "pupy", "databasesList").await.unwrap();
        assert_eq!(missing_schema.kind, ObjectKind::Unknown);

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_list_objects_returns_views() {
        let temp_file = fixture("list");
        let config = ConnectionConfig::sqlite(temp_file.clone());

        let objects = SqliteEngine::list_objects(&config, "main").await.unwrap();
        let names: Vec<&str> = objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["databasesCount", "databasesList"]);
        assert!(objects.iter().all(|o| o.kind == ObjectKind::View));

        assert!(SqliteEngine::list_objects(&config, "nope").await.unwrap().is_empty());

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_execute_view_rows() {
        let temp_file = fixture("rows");
        let config = ConnectionConfig::sqlite(temp_file.clone());

        let result = SqliteEngine::execute(&config, &view_plan("databasesList")).await.unwrap();
        let InvocationResult::Rows(rows) = result else {
            panic!("expected rows");
        };

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], serde_json::json!("master"));
        assert_eq!(rows[0]["size"], serde_json::json!(4.5));
        assert_eq!(rows[0]["icon"], serde_json::json!("AQI="));
        assert_eq!(rows[1]["size"], serde_json::Value::Null);

        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["id", "name", "size", "icon"]);

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_execute_binds_values() {
        let temp_file = fixture("binds");
        let config = ConnectionConfig::sqlite(temp_file.clone());

        let plan = CallPlan {
            sql: r#"SELECT name FROM "main"."databasesList" WHERE name = ?1"#.to_string(),
            binds: vec![ParamValue::from("msdb'; DROP TABLE databases; --")],
            shape: ResultShape::Rows,
        };
        let result = SqliteEngine::execute(&config, &plan).await.unwrap();
        assert_eq!(result, InvocationResult::Rows(Vec::new()));

        let count = SqliteEngine::execute(&config, &view_plan("databasesCount")).await.unwrap();
        let InvocationResult::Rows(rows) = count else {
            panic!("expected rows");
        };
        assert_eq!(rows[0]["total"], serde_json::json!(2));

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_execute_scalar_shape() {
        let config = ConnectionConfig::sqlite(":memory:".into());
        let plan = CallPlan {
            sql: "SELECT ?1 AS result".to_string(),
            binds: vec![ParamValue::Int(7)],
            shape: ResultShape::Scalar,
        };
        let result = SqliteEngine::execute(&config, &plan).await.unwrap();
        assert_eq!(result, InvocationResult::Text(Some("7".to_string())));
    }

    #[tokio::test]
    async fn test_execute_is_read_only() {
        let temp_file = fixture("read_only");
        let config = ConnectionConfig::sqlite(temp_file.clone());

        let plan = CallPlan {
            sql: "DELETE FROM databases".to_string(),
            binds: Vec::new(),
            shape: ResultShape::Rows,
        };
        let err = SqliteEngine::execute(&config, &plan).await.unwrap_err();
        assert_eq!(err.error_code(), "EXECUTION_FAILED");

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_execute_missing_file() {
        let config = ConnectionConfig::sqlite("/nonexistent/sqlgate.db".into());
        let err = SqliteEngine::execute(&config, &view_plan("x")).await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_FAILED");
    }
}
