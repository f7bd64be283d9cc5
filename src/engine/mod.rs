//! Database Engine Traits and Core Types
//!
//! This module defines the abstractions every database engine implements.
//! Each engine (`SQL Server`, `PostgreSQL`, `SQLite`) implements the
//! `DatabaseEngine` trait in its own module.
//!
//! # Stateless Design
//! All trait methods are stateless and take `&ConnectionConfig` as input.
//! Connections are opened, used, and dropped within each method call, so a
//! connection is released on every exit path, including errors and
//! cancellation.
//!
//! # Engine Isolation
//! Engines only classify objects and execute call plans. SQL text for
//! invocations is built by [`crate::strategy`]; engines never compose
//! identifiers themselves, except inside their own catalog queries.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{GateError, Result};
use crate::params::ParamValue;

#[cfg(feature = "mssql")]
pub mod mssql;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Microsoft SQL Server
    #[serde(rename = "mssql")]
    SqlServer,
    /// `PostgreSQL` database
    Postgres,
    /// `SQLite` database
    SQLite,
}

impl DatabaseType {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SqlServer => "mssql",
            Self::Postgres => "postgres",
            Self::SQLite => "sqlite",
        }
    }

    /// Schema exposed when none is configured
    #[must_use]
    pub const fn default_schema(&self) -> &'static str {
        match self {
            Self::SqlServer | Self::Postgres => "pupy",
            Self::SQLite => "main",
        }
    }

    /// Default server port (None for file-based engines)
    #[must_use]
    pub const fn default_port(&self) -> Option<u16> {
        match self {
            Self::SqlServer => Some(1433),
            Self::Postgres => Some(5432),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(Self::SqlServer),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::SQLite),
            other => Err(GateError::invalid_input(format!(
                "Unknown engine '{other}'. Expected one of: mssql, postgres, sqlite"
            ))),
        }
    }
}

/// Connection configuration for database engines
///
/// Fields are engine-specific (e.g., `file` only applies to `SQLite`,
/// `trust_cert` only to `SQL Server`).
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database engine type
    pub engine: DatabaseType,

    /// Hostname (for mssql/postgres)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port number (for mssql/postgres)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Username (for mssql/postgres)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password (for mssql/postgres)
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Database name (for mssql/postgres)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Database file path (for sqlite)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Accept the server certificate without validation (for mssql)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub trust_cert: bool,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("file", &self.file)
            .field("trust_cert", &self.trust_cert)
            .finish()
    }
}

impl ConnectionConfig {
    /// Create a new `SQL Server` connection config
    #[must_use]
    pub const fn sql_server(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            engine: DatabaseType::SqlServer,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
            trust_cert: false,
        }
    }

    /// Create a new `PostgreSQL` connection config
    #[must_use]
    pub const fn postgres(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            engine: DatabaseType::Postgres,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
            trust_cert: false,
        }
    }

    /// Create a new `SQLite` connection config
    #[must_use]
    pub const fn sqlite(file: PathBuf) -> Self {
        Self {
            engine: DatabaseType::SQLite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            file: Some(file),
            trust_cert: false,
        }
    }

    /// Fail unless this config targets `expected`
    pub fn expect_engine(&self, expected: DatabaseType) -> Result<()> {
        if self.engine == expected {
            Ok(())
        } else {
            Err(GateError::invalid_input(format!(
                "Expected {expected} engine, got {}",
                self.engine
            )))
        }
    }

    /// Name of the target database, for display
    #[must_use]
    pub fn database_label(&self) -> String {
        match (&self.database, &self.file) {
            (Some(db), _) => db.clone(),
            (None, Some(file)) => file
                .file_name()
                .and_then(|n| n.to_str())
                .map_or_else(|| file.display().to_string(), str::to_string),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Connection information returned after successful connection validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Database server version string
    pub database_version: String,

    /// Server information (implementation-specific)
    pub server_info: String,

    /// Name of the connected database
    pub connected_database: String,

    /// Connected user name
    pub user: String,
}

/// Invocation kind of a catalog object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    View,
    TableFunction,
    ScalarFunction,
    Procedure,
    /// No invocable object with that name
    Unknown,
}

impl ObjectKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::TableFunction => "table_function",
            Self::ScalarFunction => "scalar_function",
            Self::Procedure => "procedure",
            Self::Unknown => "unknown",
        }
    }

    /// Map a `sys.objects.type` code onto a kind
    #[must_use]
    pub fn from_sql_server_type(code: &str) -> Self {
        match code.trim() {
            "V" => Self::View,
            "IF" | "TF" | "FT" => Self::TableFunction,
            "FN" | "FS" => Self::ScalarFunction,
            "P" | "PC" => Self::Procedure,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared parameter of a function or procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter name without any engine sigil (`@`)
    pub name: String,

    /// Declared type as reported by the catalog
    pub type_name: String,

    /// Output (or INOUT) parameter
    #[serde(default)]
    pub is_output: bool,
}

/// Classified catalog object
///
/// Produced per request and never cached. `schema` and `name` carry the
/// catalog's own spelling when the object exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub schema: String,
    pub name: String,
    pub kind: ObjectKind,

    /// Declared parameters in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterInfo>,
}

impl ObjectDescriptor {
    #[must_use]
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self { schema: schema.into(), name: name.into(), kind, parameters: Vec::new() }
    }

    /// Descriptor for a name with no catalog entry
    #[must_use]
    pub fn unknown(schema: &str, name: &str) -> Self {
        Self::new(schema, name, ObjectKind::Unknown)
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<ParameterInfo>) -> Self {
        self.parameters = parameters;
        self
    }

    /// `schema.name`, unquoted
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Declared parameters the caller may supply
    pub fn input_parameters(&self) -> impl Iterator<Item = &ParameterInfo> {
        self.parameters.iter().filter(|p| !p.is_output)
    }
}

/// One materialised row, columns in cursor order
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Raw outcome of executing a call plan
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    /// Row set from a view or table function
    Rows(Vec<Row>),
    /// Single text value from a scalar function or procedure output
    Text(Option<String>),
}

/// How an engine reads the result of a call plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultShape {
    /// Materialise every row of the (first) result set
    Rows,
    /// First column of the first row
    Scalar,
    /// Named column of the first row of the last result set
    Output { column: String },
}

/// SQL text plus its bound values, ready for execution
///
/// `sql` contains only validated identifiers and placeholders; every
/// caller-supplied value lives in `binds`, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CallPlan {
    pub sql: String,
    pub binds: Vec<ParamValue>,
    pub shape: ResultShape,
}

/// Database engine trait
///
/// All database engines implement this trait.
/// Each method is stateless and takes a connection config as input.
pub trait DatabaseEngine {
    /// Dialect used when building call plans for this engine
    const ENGINE: DatabaseType;

    /// Validate connection and return connection information
    ///
    /// Opens a connection, reads the server version and session metadata,
    /// then closes it. No persistent connection is maintained.
    fn validate_connection(
        config: &ConnectionConfig,
    ) -> impl std::future::Future<Output = Result<ConnectionInfo>> + Send;

    /// Classify `schema.name` with a single catalog lookup
    ///
    /// `schema` and `name` are bound as values. A missing object yields
    /// `ObjectKind::Unknown`; failing to reach the catalog is an error.
    fn classify(
        config: &ConnectionConfig,
        schema: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<ObjectDescriptor>> + Send;

    /// List every invocable object in `schema`, with declared parameters
    fn list_objects(
        config: &ConnectionConfig,
        schema: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ObjectDescriptor>>> + Send;

    /// Execute a call plan and read its result according to `plan.shape`
    ///
    /// Engine-side failures are reported as `ExecutionFailed`; failing to
    /// connect is `ConnectionFailed`.
    fn execute(
        config: &ConnectionConfig,
        plan: &CallPlan,
    ) -> impl std::future::Future<Output = Result<InvocationResult>> + Send;
}
