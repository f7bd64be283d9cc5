//! `PostgreSQL` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `PostgreSQL` databases.
//!
//! # Features
//! - Client-server connections via TCP
//! - Object classification via `pg_class` / `pg_proc`, declared parameters
//!   via `information_schema.parameters`
//! - Procedures invoked with `CALL`, their `response` OUT argument read back
//!   from the returned row
//! - Rich type support (JSON/JSONB, NUMERIC via `rust_decimal`, timestamps, UUID, arrays)
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - Caller values are converted to the parameter type the server infers
//! - Name matching is exact: catalog names are case-sensitive
//! - Overloaded routines share one parameter list (all overloads' names)
//! - BYTEA data is Base64-encoded for JSON safety

use std::str::FromStr;

use bytes::BytesMut;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::debug;

use crate::engine::{
    CallPlan, ConnectionConfig, ConnectionInfo, DatabaseEngine, DatabaseType, InvocationResult,
    ObjectDescriptor, ObjectKind, ParameterInfo, ResultShape,
};
use crate::error::{GateError, Result};
use crate::params::ParamValue;

const CLASSIFY_QUERY: &str = "\
SELECT n.nspname::text AS schema_name, c.relname::text AS object_name, 'view' AS kind
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('v', 'm')
UNION ALL
SELECT n.nspname::text, p.proname::text,
       CASE WHEN p.prokind = 'p' THEN 'procedure'
            WHEN p.proretset THEN 'table_function'
            ELSE 'scalar_function' END
FROM pg_catalog.pg_proc p
JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
WHERE n.nspname = $1 AND p.proname = $2 AND p.prokind IN ('f', 'p')
LIMIT 1";

const LIST_QUERY: &str = "\
SELECT c.relname::text AS object_name, 'view' AS kind
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('v', 'm')
UNION ALL
SELECT p.proname::text,
       CASE WHEN p.prokind = 'p' THEN 'procedure'
            WHEN p.proretset THEN 'table_function'
            ELSE 'scalar_function' END
FROM pg_catalog.pg_proc p
JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
WHERE n.nspname = $1 AND p.prokind IN ('f', 'p')
ORDER BY 1";

const PARAMETERS_QUERY: &str = "\
SELECT r.routine_name::text, p.parameter_name::text, p.data_type::text, p.parameter_mode::text
FROM information_schema.routines r
JOIN information_schema.parameters p
  ON p.specific_schema = r.specific_schema AND p.specific_name = r.specific_name
WHERE r.routine_schema = $1 AND ($2::text IS NULL OR r.routine_name = $2)
ORDER BY r.routine_name, r.specific_name, p.ordinal_position";

/// `PostgreSQL` database engine implementation
pub struct PostgresEngine;

impl DatabaseEngine for PostgresEngine {
    const ENGINE: DatabaseType = DatabaseType::Postgres;

    async fn validate_connection(config: &ConnectionConfig) -> Result<ConnectionInfo> {
        config.expect_engine(DatabaseType::Postgres)?;
        let client = connect(config).await?;

        let row = client
            .query_one("SELECT version(), current_database()::text, current_user::text", &[])
            .await
            .map_err(|e| {
                GateError::connection_failed(format!("Failed to query PostgreSQL version: {e}"))
            })?;

        let version_string: String = row.get(0);

        // Extract version number (e.g., "PostgreSQL 15.3 on x86_64..." -> "15.3")
        let database_version =
            version_string.split_whitespace().nth(1).unwrap_or("unknown").to_string();

        Ok(ConnectionInfo {
            database_version,
            server_info: version_string,
            connected_database: row.get(1),
            user: row.get(2),
        })
    }

    async fn classify(config: &ConnectionConfig, schema: &str, name: &str) -> Result<ObjectDescriptor> {
        config.expect_engine(DatabaseType::Postgres)?;
        let client = connect(config).await?;

        let row = client
            .query_opt(CLASSIFY_QUERY, &[&schema, &name])
            .await
            .map_err(|e| GateError::engine_error("postgres", format!("Catalog lookup failed: {e}")))?;

        let Some(row) = row else {
            return Ok(ObjectDescriptor::unknown(schema, name));
        };

        let kind = kind_from_catalog(row.get(2));
        let mut object = ObjectDescriptor::new(row.get::<_, String>(0), row.get::<_, String>(1), kind);

        if kind != ObjectKind::View {
            object.parameters = load_parameters(&client, schema, Some(name))
                .await?
                .into_iter()
                .map(|(_, param)| param)
                .collect();
        }

        Ok(object)
    }

    async fn list_objects(config: &ConnectionConfig, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        config.expect_engine(DatabaseType::Postgres)?;
        let client = connect(config).await?;

        let rows = client
            .query(LIST_QUERY, &[&schema])
            .await
            .map_err(|e| GateError::engine_error("postgres", format!("Failed to list objects: {e}")))?;

        let mut objects: Vec<ObjectDescriptor> = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.get(0);
            // Overloads collapse into one object
            if objects.last().is_some_and(|o| o.name == name) {
                continue;
            }
            objects.push(ObjectDescriptor::new(schema, name, kind_from_catalog(row.get(1))));
        }

        for (routine, param) in load_parameters(&client, schema, None).await? {
            if let Some(object) = objects.iter_mut().find(|o| o.name == routine) {
                object.parameters.push(param);
            }
        }

        Ok(objects)
    }

    async fn execute(config: &ConnectionConfig, plan: &CallPlan) -> Result<InvocationResult> {
        config.expect_engine(DatabaseType::Postgres)?;
        let client = connect(config).await?;

        let params: Vec<&(dyn ToSql + Sync)> =
            plan.binds.iter().map(|b| b as &(dyn ToSql + Sync)).collect();
        debug!(binds = params.len(), "Executing PostgreSQL call");

        let rows = client
            .query(plan.sql.as_str(), &params)
            .await
            .map_err(|e| GateError::execution_failed(describe_db_error(&e)))?;

        match &plan.shape {
            ResultShape::Rows => rows
                .iter()
                .map(row_to_json)
                .collect::<Result<Vec<_>>>()
                .map(InvocationResult::Rows),
            ResultShape::Scalar => first_value_as_text(rows.first(), None),
            ResultShape::Output { column } => first_value_as_text(rows.first(), Some(column)),
        }
    }
}

fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| GateError::invalid_input("PostgreSQL requires 'host' parameter"))?;

    let user = config
        .user
        .as_ref()
        .ok_or_else(|| GateError::invalid_input("PostgreSQL requires 'user' parameter"))?;

    let password = config
        .password
        .as_ref()
        .ok_or_else(|| GateError::invalid_input("PostgreSQL requires 'password' parameter"))?;

    let database = config
        .database
        .as_ref()
        .ok_or_else(|| GateError::invalid_input("PostgreSQL requires 'database' parameter"))?;

    let mut pg_config = Config::new();
    pg_config
        .host(host)
        .port(config.port.unwrap_or(5432))
        .user(user)
        .password(password)
        .dbname(database)
        .application_name("sqlgate");

    Ok(pg_config)
}

/// Open a client; dropping it ends the spawned connection task
async fn connect(config: &ConnectionConfig) -> Result<Client> {
    let pg_config = build_pg_config(config)?;

    let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
        GateError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
    })?;

    // Connection errors are not logged to prevent credential leakage
    tokio::spawn(async move {
        let _ = connection.await;
    });

    Ok(client)
}

fn kind_from_catalog(kind: &str) -> ObjectKind {
    match kind {
        "view" => ObjectKind::View,
        "table_function" => ObjectKind::TableFunction,
        "scalar_function" => ObjectKind::ScalarFunction,
        "procedure" => ObjectKind::Procedure,
        _ => ObjectKind::Unknown,
    }
}

/// Declared parameters of routines in `schema`, optionally one routine only
async fn load_parameters(
    client: &Client,
    schema: &str,
    routine: Option<&str>,
) -> Result<Vec<(String, ParameterInfo)>> {
    let rows = client
        .query(PARAMETERS_QUERY, &[&schema, &routine])
        .await
        .map_err(|e| GateError::engine_error("postgres", format!("Failed to read parameters: {e}")))?;

    let mut params: Vec<(String, ParameterInfo)> = Vec::new();
    for row in &rows {
        let routine: String = row.get(0);
        // Unnamed arguments cannot be passed by name
        let Some(name) = row.get::<_, Option<String>>(1) else {
            continue;
        };
        let mode: Option<String> = row.get(3);
        if params.iter().any(|(r, p)| *r == routine && p.name == name) {
            continue;
        }
        params.push((
            routine,
            ParameterInfo {
                name,
                type_name: row.get::<_, Option<String>>(2).unwrap_or_default(),
                is_output: matches!(mode.as_deref(), Some("OUT" | "INOUT")),
            },
        ));
    }

    Ok(params)
}

/// Include the server's detail and hint lines when present
fn describe_db_error(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => {
            let mut message = db.message().to_string();
            if let Some(detail) = db.detail() {
                message.push_str(&format!(" ({detail})"));
            }
            message
        }
        None => e.to_string(),
    }
}

fn first_value_as_text(row: Option<&Row>, column: Option<&str>) -> Result<InvocationResult> {
    let Some(row) = row else {
        return Ok(InvocationResult::Text(None));
    };
    if row.is_empty() {
        return Ok(InvocationResult::Text(None));
    }

    let idx = column
        .and_then(|wanted| row.columns().iter().position(|c| c.name().eq_ignore_ascii_case(wanted)))
        .unwrap_or(0);

    Ok(InvocationResult::Text(match postgres_value_to_json(row, idx)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }))
}

fn row_to_json(row: &Row) -> Result<crate::engine::Row> {
    let mut out = crate::engine::Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), postgres_value_to_json(row, idx)?);
    }
    Ok(out)
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        GateError::engine_error(
            "postgres",
            format!("Failed to read column '{}': {e}", row.columns()[idx].name()),
        )
    })
}

fn number<T: Into<serde_json::Number>>(v: Option<T>) -> serde_json::Value {
    v.map_or(serde_json::Value::Null, |v| serde_json::Value::Number(v.into()))
}

fn float(v: Option<f64>) -> serde_json::Value {
    // NaN/Infinity as null
    v.and_then(serde_json::Number::from_f64).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn string(v: Option<String>) -> serde_json::Value {
    v.map_or(serde_json::Value::Null, serde_json::Value::String)
}

fn array<T, F>(v: Option<Vec<Option<T>>>, f: F) -> serde_json::Value
where
    F: Fn(Option<T>) -> serde_json::Value,
{
    v.map_or(serde_json::Value::Null, |items| {
        serde_json::Value::Array(items.into_iter().map(f).collect())
    })
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    use serde_json::Value;

    let col_type = row.columns()[idx].type_();

    let value = match *col_type {
        Type::BOOL => get::<bool>(row, idx)?.map_or(Value::Null, Value::Bool),
        Type::INT2 => number(get::<i16>(row, idx)?),
        Type::INT4 => number(get::<i32>(row, idx)?),
        Type::INT8 => number(get::<i64>(row, idx)?),
        Type::OID => number(get::<u32>(row, idx)?),
        Type::FLOAT4 => float(get::<f32>(row, idx)?.map(f64::from)),
        Type::FLOAT8 => float(get::<f64>(row, idx)?),
        Type::NUMERIC => get::<Decimal>(row, idx)?.map_or(Value::Null, decimal_to_json),

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            string(get::<String>(row, idx)?)
        }

        // JSON types stay nested
        Type::JSON | Type::JSONB => get::<Value>(row, idx)?.unwrap_or(Value::Null),

        // BYTEA (binary data) - encode as Base64
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map_or(Value::Null, |v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),

        // Timestamps - convert to ISO 8601 strings
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.format("%H:%M:%S%.f").to_string())),

        Type::UUID => get::<uuid::Uuid>(row, idx)?.map_or(Value::Null, |v| Value::String(v.to_string())),

        Type::BOOL_ARRAY => array(get::<Vec<Option<bool>>>(row, idx)?, |v| v.map_or(Value::Null, Value::Bool)),
        Type::INT2_ARRAY => array(get::<Vec<Option<i16>>>(row, idx)?, number),
        Type::INT4_ARRAY => array(get::<Vec<Option<i32>>>(row, idx)?, number),
        Type::INT8_ARRAY => array(get::<Vec<Option<i64>>>(row, idx)?, number),
        Type::FLOAT4_ARRAY => array(get::<Vec<Option<f32>>>(row, idx)?, |v| float(v.map(f64::from))),
        Type::FLOAT8_ARRAY => array(get::<Vec<Option<f64>>>(row, idx)?, float),
        Type::NUMERIC_ARRAY => {
            array(get::<Vec<Option<Decimal>>>(row, idx)?, |v| v.map_or(Value::Null, decimal_to_json))
        }
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            array(get::<Vec<Option<String>>>(row, idx)?, string)
        }

        // Enums, citext, xml and friends send their text as binary
        _ => get::<RawText>(row, idx)?.map_or(Value::Null, |t| Value::String(t.0)),
    };

    Ok(value)
}

/// Any value whose binary wire format is UTF-8 text
struct RawText(String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        std::str::from_utf8(raw)
            .map(|s| Self(s.to_string()))
            .map_err(|_| format!("type '{}' cannot be converted to JSON", ty.name()).into())
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// NUMERIC as a JSON number when it fits an `f64` (up to 15 significant digits)
fn decimal_to_json(d: Decimal) -> serde_json::Value {
    let digits = d.mantissa().unsigned_abs().checked_ilog10().map_or(1, |n| n + 1);
    if digits <= 15 {
        if d.scale() == 0 {
            if let Some(i) = d.to_i64() {
                return serde_json::Value::Number(i.into());
            }
        }
        if let Some(n) = d.to_f64().and_then(serde_json::Number::from_f64) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(d.to_string())
}

/// Convert caller values to whatever parameter type the server inferred
impl ToSql for ParamValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        if matches!(self, Self::Null) {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => self.as_bool()?.to_sql(ty, out),
            Type::INT2 => i16::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT8 => self.as_i64()?.to_sql(ty, out),
            #[allow(clippy::cast_possible_truncation)]
            Type::FLOAT4 => (self.as_f64()? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.as_f64()?.to_sql(ty, out),
            Type::NUMERIC => self.as_decimal()?.to_sql(ty, out),
            Type::JSON | Type::JSONB => self.as_json().to_sql(ty, out),
            Type::DATE => parse_text::<chrono::NaiveDate>(self, |s| {
                chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
            })?
            .to_sql(ty, out),
            Type::TIMESTAMP => parse_text::<chrono::NaiveDateTime>(self, |s| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                    .ok()
            })?
            .to_sql(ty, out),
            Type::TIMESTAMPTZ => parse_text::<chrono::DateTime<chrono::Utc>>(self, |s| {
                chrono::DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&chrono::Utc))
            })?
            .to_sql(ty, out),
            Type::UUID => parse_text::<uuid::Uuid>(self, |s| uuid::Uuid::parse_str(s).ok())?.to_sql(ty, out),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                self.as_text().unwrap_or_default().to_sql(ty, out)
            }
            _ => Err(format!(
                "parameter type '{}' is not supported, pass a text, numeric, boolean, json, date or uuid argument",
                ty.name()
            )
            .into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

type BoxError = Box<dyn std::error::Error + Sync + Send>;

impl ParamValue {
    fn as_bool(&self) -> std::result::Result<bool, BoxError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Int(i) => Ok(*i != 0),
            Self::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" | "on" => Ok(true),
                "false" | "f" | "0" | "no" | "off" => Ok(false),
                _ => Err(format!("'{s}' is not a boolean").into()),
            },
            other => Err(format!("{} cannot be bound as boolean", other.type_name()).into()),
        }
    }

    fn as_i64(&self) -> std::result::Result<i64, BoxError> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Bool(b) => Ok(i64::from(*b)),
            Self::String(s) => s.trim().parse::<i64>().map_err(|_| format!("'{s}' is not an integer").into()),
            other => Err(format!("{} cannot be bound as integer", other.type_name()).into()),
        }
    }

    fn as_f64(&self) -> std::result::Result<f64, BoxError> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Ok(*i as f64),
            Self::Float(f) => Ok(*f),
            Self::String(s) => s.trim().parse::<f64>().map_err(|_| format!("'{s}' is not a number").into()),
            other => Err(format!("{} cannot be bound as float", other.type_name()).into()),
        }
    }

    fn as_decimal(&self) -> std::result::Result<Decimal, BoxError> {
        match self {
            Self::Int(i) => Ok(Decimal::from(*i)),
            Self::Float(f) => Decimal::try_from(*f).map_err(|_| format!("{f} is not a decimal").into()),
            Self::String(s) => Decimal::from_str(s.trim())
                .or_else(|_| Decimal::from_scientific(s.trim()))
                .map_err(|_| format!("'{s}' is not a decimal").into()),
            other => Err(format!("{} cannot be bound as numeric", other.type_name()).into()),
        }
    }

    fn as_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::Number((*i).into()),
            Self::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Self::String(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone()))
            }
        }
    }
}

fn parse_text<T>(
    value: &ParamValue,
    parse: impl Fn(&str) -> Option<T>,
) -> std::result::Result<T, BoxError> {
    match value {
        ParamValue::String(s) => parse(s.trim()).ok_or_else(|| format!("'{s}' has the wrong format").into()),
        other => Err(format!("{} cannot be bound here, pass a string", other.type_name()).into()),
    }
}
