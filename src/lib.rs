//! sqlgate - Convention-Routed Database Gateway
//!
//! sqlgate exposes the views, table functions, scalar functions and stored
//! procedures of one database schema as JSON endpoints. A request to
//! `/{resource}/{action}` is resolved to the object `{resource}{Action}`,
//! classified through the catalog, invoked with bound parameters and
//! normalized into JSON.
//!
//! # Core Principles
//! - No SQL from callers: identifiers are validated and quoted, values are bound
//! - Least privilege by default (read-only capabilities)
//! - Stateless requests: every call classifies and connects afresh
//!
//! # Module Organization
//! - [`identifier`] / [`resolver`] - name validation and route-to-object resolution
//! - [`params`] - parameter bag built from query strings and JSON bodies
//! - [`engine`] - database engine trait, catalog types and implementations
//! - [`strategy`] - per-kind call plans and dialect quoting
//! - [`capability`] / [`normalize`] - invocation policy and response shaping
//! - [`dispatch`] - the request lifecycle
//! - [`http`] / [`mcp`] - HTTP and MCP surfaces
//! - [`config`] - saved connections
//! - [`error`] / [`output`] - errors and JSON bodies

pub mod capability;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod http;
pub mod identifier;
pub mod mcp;
pub mod normalize;
pub mod output;
pub mod params;
pub mod resolver;
pub mod strategy;

// Re-export commonly used types for convenience
pub use capability::{Capabilities, Method};
pub use config::{
    load_with_precedence, resolve_connection, save_connection, ConfigLocation, ConnectionRegistry,
    ResolvedConnection, StoredConnection,
};
pub use dispatch::{Dispatcher, GatewayConfig, InvocationRequest};
pub use engine::{
    CallPlan, ConnectionConfig, ConnectionInfo, DatabaseEngine, DatabaseType, InvocationResult,
    ObjectDescriptor, ObjectKind, ParameterInfo, ResultShape,
};
pub use error::{GateError, Result};
pub use normalize::ResponsePolicy;
pub use output::{ErrorBody, ErrorEnvelope, ErrorInfo, HealthReport, Metadata, SuccessEnvelope};
pub use params::{ParamValue, ParameterBag};
