//! `SQL Server` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for Microsoft SQL Server.
//!
//! # Features
//! - TCP connections with SQL Server authentication
//! - Object classification via `sys.objects` / `sys.schemas` / `sys.parameters`
//! - Procedure output capture through a single batched script
//!
//! # Implementation Notes
//! - Uses `tiberius` (async TDS driver) over a tokio `TcpStream`
//!   adapted with `tokio-util`'s compat layer
//! - Every call runs through `sp_executesql` with `@P1..` parameters
//! - Name matching follows the database collation (case-insensitive by default)
//! - VARBINARY data is Base64-encoded for JSON safety
//! - DECIMAL values become JSON numbers when they fit an `f64` exactly
//!   enough (up to 15 significant digits), strings otherwise

use std::borrow::Cow;

use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::engine::{
    CallPlan, ConnectionConfig, ConnectionInfo, DatabaseEngine, DatabaseType, InvocationResult,
    ObjectDescriptor, ObjectKind, ParameterInfo, ResultShape, Row,
};
use crate::error::{GateError, Result};
use crate::params::ParamValue;

type SqlClient = Client<Compat<TcpStream>>;

const CLASSIFY_QUERY: &str = "\
SELECT s.name AS schema_name, o.name AS object_name, RTRIM(o.type) AS type_code, \
       p.name AS parameter_name, TYPE_NAME(p.user_type_id) AS type_name, p.is_output \
FROM sys.objects AS o \
JOIN sys.schemas AS s ON s.schema_id = o.schema_id \
LEFT JOIN sys.parameters AS p ON p.object_id = o.object_id AND p.parameter_id > 0 \
WHERE s.name = @P1 AND o.name = @P2 \
ORDER BY p.parameter_id";

const LIST_QUERY: &str = "\
SELECT s.name AS schema_name, o.name AS object_name, RTRIM(o.type) AS type_code, \
       p.name AS parameter_name, TYPE_NAME(p.user_type_id) AS type_name, p.is_output \
FROM sys.objects AS o \
JOIN sys.schemas AS s ON s.schema_id = o.schema_id \
LEFT JOIN sys.parameters AS p ON p.object_id = o.object_id AND p.parameter_id > 0 \
WHERE s.name = @P1 AND o.type IN ('V', 'IF', 'TF', 'FT', 'FN', 'FS', 'P', 'PC') \
ORDER BY o.name, p.parameter_id";

/// `SQL Server` database engine implementation
pub struct SqlServerEngine;

impl DatabaseEngine for SqlServerEngine {
    const ENGINE: DatabaseType = DatabaseType::SqlServer;

    async fn validate_connection(config: &ConnectionConfig) -> Result<ConnectionInfo> {
        config.expect_engine(DatabaseType::SqlServer)?;
        let mut client = connect(config).await?;

        let rows = client
            .simple_query(
                "SELECT @@VERSION AS version, DB_NAME() AS database_name, SUSER_SNAME() AS user_name",
            )
            .await
            .map_err(|e| {
                GateError::connection_failed(format!("Failed to query SQL Server version: {e}"))
            })?
            .into_first_result()
            .await
            .map_err(|e| {
                GateError::connection_failed(format!("Failed to read SQL Server version: {e}"))
            })?;

        let row = rows
            .first()
            .ok_or_else(|| GateError::connection_failed("SQL Server returned no version row"))?;

        let version_string = get_string(row, "version")?.unwrap_or_default();
        let connected_database = get_string(row, "database_name")?.unwrap_or_default();
        let user = get_string(row, "user_name")?.unwrap_or_default();

        // "Microsoft SQL Server 2022 (RTM) - 16.0.1000.6 (X64) ..." -> "16.0.1000.6"
        let database_version = version_string
            .split_whitespace()
            .find(|token| token.chars().next().is_some_and(|c| c.is_ascii_digit()) && token.contains('.'))
            .unwrap_or("unknown")
            .to_string();

        let server_info = version_string.lines().next().unwrap_or_default().trim().to_string();

        Ok(ConnectionInfo { database_version, server_info, connected_database, user })
    }

    async fn classify(config: &ConnectionConfig, schema: &str, name: &str) -> Result<ObjectDescriptor> {
        config.expect_engine(DatabaseType::SqlServer)?;
        let mut client = connect(config).await?;

        let rows = client
            .query(CLASSIFY_QUERY, &[&schema, &name])
            .await
            .map_err(|e| GateError::engine_error("mssql", format!("Catalog lookup failed: {e}")))?
            .into_first_result()
            .await
            .map_err(|e| GateError::engine_error("mssql", format!("Catalog lookup failed: {e}")))?;

        let mut objects = catalog_rows_to_descriptors(&rows)?;
        Ok(match objects.pop() {
            Some(object) => object,
            None => ObjectDescriptor::unknown(schema, name),
        })
    }

    async fn list_objects(config: &ConnectionConfig, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        config.expect_engine(DatabaseType::SqlServer)?;
        let mut client = connect(config).await?;

        let rows = client
            .query(LIST_QUERY, &[&schema])
            .await
            .map_err(|e| GateError::engine_error("mssql", format!("Failed to list objects: {e}")))?
            .into_first_result()
            .await
            .map_err(|e| GateError::engine_error("mssql", format!("Failed to list objects: {e}")))?;

        let objects = catalog_rows_to_descriptors(&rows)?;
        Ok(objects.into_iter().filter(|o| o.kind != ObjectKind::Unknown).collect())
    }

    async fn execute(config: &ConnectionConfig, plan: &CallPlan) -> Result<InvocationResult> {
        config.expect_engine(DatabaseType::SqlServer)?;
        let mut client = connect(config).await?;

        let params: Vec<&dyn ToSql> = plan.binds.iter().map(|b| b as &dyn ToSql).collect();
        debug!(binds = params.len(), "Executing SQL Server call");

        let mut result_sets = client
            .query(plan.sql.as_str(), &params)
            .await
            .map_err(|e| GateError::execution_failed(e.to_string()))?
            .into_results()
            .await
            .map_err(|e| GateError::execution_failed(e.to_string()))?;

        match &plan.shape {
            ResultShape::Rows => {
                let rows = if result_sets.is_empty() { Vec::new() } else { result_sets.swap_remove(0) };
                rows.into_iter().map(row_to_json).collect::<Result<Vec<_>>>().map(InvocationResult::Rows)
            }
            ResultShape::Scalar => {
                let first = result_sets.into_iter().next().unwrap_or_default();
                first_value_as_text(first.into_iter().next(), None)
            }
            ResultShape::Output { column } => {
                let last = result_sets.pop().unwrap_or_default();
                first_value_as_text(last.into_iter().next(), Some(column.as_str()))
            }
        }
    }
}

/// Build a `tiberius` config from the connection config
fn build_tds_config(config: &ConnectionConfig) -> Result<Config> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| GateError::invalid_input("SQL Server requires 'host' parameter"))?;

    let user = config.user.as_ref().ok_or_else(|| {
        GateError::invalid_input("SQL Server requires 'user' parameter (integrated auth is not supported)")
    })?;

    let password = config
        .password
        .as_ref()
        .ok_or_else(|| GateError::invalid_input("SQL Server requires 'password' parameter"))?;

    let database = config
        .database
        .as_ref()
        .ok_or_else(|| GateError::invalid_input("SQL Server requires 'database' parameter"))?;

    let mut tds = Config::new();
    tds.host(host);
    tds.port(config.port.unwrap_or(1433));
    tds.database(database);
    tds.authentication(AuthMethod::sql_server(user, password));
    tds.application_name("sqlgate");
    if config.trust_cert {
        tds.trust_cert();
    }

    Ok(tds)
}

/// Open a client; dropping it closes the connection
async fn connect(config: &ConnectionConfig) -> Result<SqlClient> {
    let tds = build_tds_config(config)?;

    let tcp = TcpStream::connect(tds.get_addr()).await.map_err(|e| {
        GateError::connection_failed(format!("Failed to reach SQL Server: {e}"))
    })?;
    tcp.set_nodelay(true).map_err(|e| {
        GateError::connection_failed(format!("Failed to configure SQL Server socket: {e}"))
    })?;

    Client::connect(tds, tcp.compat_write())
        .await
        .map_err(|e| GateError::connection_failed(format!("Failed to connect to SQL Server: {e}")))
}

/// Group catalog rows (one per object parameter) into descriptors
fn catalog_rows_to_descriptors(rows: &[tiberius::Row]) -> Result<Vec<ObjectDescriptor>> {
    let mut objects: Vec<ObjectDescriptor> = Vec::new();

    for row in rows {
        let schema = get_string(row, "schema_name")?.unwrap_or_default();
        let name = get_string(row, "object_name")?.unwrap_or_default();
        let type_code = get_string(row, "type_code")?.unwrap_or_default();

        let is_same = objects.last().is_some_and(|o| o.schema == schema && o.name == name);
        if !is_same {
            objects.push(ObjectDescriptor::new(schema, name, ObjectKind::from_sql_server_type(&type_code)));
        }

        if let Some(param) = get_string(row, "parameter_name")? {
            let type_name = get_string(row, "type_name")?.unwrap_or_default();
            let is_output = row
                .try_get::<bool, _>("is_output")
                .map_err(|e| GateError::engine_error("mssql", format!("Bad is_output value: {e}")))?
                .unwrap_or(false);

            if let Some(object) = objects.last_mut() {
                object.parameters.push(ParameterInfo {
                    name: param.trim_start_matches('@').to_string(),
                    type_name,
                    is_output,
                });
            }
        }
    }

    Ok(objects)
}

fn get_string(row: &tiberius::Row, column: &str) -> Result<Option<String>> {
    row.try_get::<&str, _>(column)
        .map(|v| v.map(str::to_string))
        .map_err(|e| GateError::engine_error("mssql", format!("Failed to read column '{column}': {e}")))
}

/// Read one value of the first row as text
///
/// Non-text values are rendered as their JSON text so the normalizer can
/// parse them back.
fn first_value_as_text(row: Option<tiberius::Row>, column: Option<&str>) -> Result<InvocationResult> {
    let Some(row) = row else {
        return Ok(InvocationResult::Text(None));
    };

    let idx = column
        .and_then(|wanted| row.columns().iter().position(|c| c.name().eq_ignore_ascii_case(wanted)))
        .unwrap_or(0);

    let value = row.into_iter().nth(idx).map(column_to_json).transpose()?;

    Ok(InvocationResult::Text(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    }))
}

/// Convert a `tiberius` row into a JSON row, keeping column order
fn row_to_json(row: tiberius::Row) -> Result<Row> {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut out = Row::new();

    for (name, data) in names.into_iter().zip(row) {
        out.insert(name, column_to_json(data)?);
    }

    Ok(out)
}

/// Convert a single `SQL Server` value to JSON
fn column_to_json(data: ColumnData<'static>) -> Result<serde_json::Value> {
    use serde_json::Value;

    let value = match &data {
        ColumnData::U8(v) => v.map_or(Value::Null, |v| Value::Number(v.into())),
        ColumnData::I16(v) => v.map_or(Value::Null, |v| Value::Number(v.into())),
        ColumnData::I32(v) => v.map_or(Value::Null, |v| Value::Number(v.into())),
        ColumnData::I64(v) => v.map_or(Value::Null, |v| Value::Number(v.into())),
        ColumnData::F32(v) => v
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map_or(Value::Null, Value::Number), // NaN/Infinity as null
        ColumnData::F64(v) => v.and_then(serde_json::Number::from_f64).map_or(Value::Null, Value::Number),
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::String(v) => v.as_ref().map_or(Value::Null, |s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map_or(Value::Null, |g| Value::String(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map_or(Value::Null, |b| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }),
        ColumnData::Numeric(v) => v.as_ref().map_or(Value::Null, |n| decimal_to_json(&n.to_string())),
        ColumnData::Xml(v) => v.as_ref().map_or(Value::Null, |x| Value::String(x.to_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            chrono::NaiveDateTime::from_sql(&data)
                .map_err(|e| conversion_error("datetime", &e))?
                .map_or(Value::Null, |v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
        }
        ColumnData::Date(_) => chrono::NaiveDate::from_sql(&data)
            .map_err(|e| conversion_error("date", &e))?
            .map_or(Value::Null, |v| Value::String(v.format("%Y-%m-%d").to_string())),
        ColumnData::Time(_) => chrono::NaiveTime::from_sql(&data)
            .map_err(|e| conversion_error("time", &e))?
            .map_or(Value::Null, |v| Value::String(v.format("%H:%M:%S%.f").to_string())),
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<chrono::FixedOffset>::from_sql(&data)
            .map_err(|e| conversion_error("datetimeoffset", &e))?
            .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
    };

    Ok(value)
}

/// DECIMAL/NUMERIC text to a JSON number when no precision is lost
fn decimal_to_json(text: &str) -> serde_json::Value {
    let digits = text.chars().filter(char::is_ascii_digit).count();
    if digits <= 15 {
        if let Some(n) = text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            if !text.contains('.') {
                if let Ok(i) = text.parse::<i64>() {
                    return serde_json::Value::Number(i.into());
                }
            }
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(text.to_string())
}

fn conversion_error(kind: &str, e: &tiberius::error::Error) -> GateError {
    GateError::engine_error("mssql", format!("Failed to convert {kind} value: {e}"))
}

/// Bind caller values natively; the server converts to the declared types
impl ToSql for ParamValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            Self::Null => ColumnData::String(None),
            Self::Bool(b) => ColumnData::Bit(Some(*b)),
            Self::Int(i) => ColumnData::I64(Some(*i)),
            Self::Float(f) => ColumnData::F64(Some(*f)),
            Self::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
        }
    }
}
