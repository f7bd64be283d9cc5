//! Request Dispatcher
//!
//! Orchestrates one invocation:
//!
//! ```text
//! Received → Resolved → Classified → Invoked → Normalized → Responded
//!     └──────────┴───────────┴───────────┴──────────┴──→ Errored
//! ```
//!
//! The dispatcher owns only immutable configuration. Every request
//! classifies its object afresh and opens its own connection through the
//! engine, so concurrent requests share no mutable state.

use std::marker::PhantomData;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info};

use crate::capability::{apply_row_limit, check_invocation, Capabilities, Method};
use crate::engine::{
    CallPlan, ConnectionConfig, ConnectionInfo, DatabaseEngine, DatabaseType, InvocationResult,
    ObjectDescriptor, ObjectKind,
};
use crate::error::{GateError, Result};
use crate::identifier;
use crate::normalize::{normalize, ResponsePolicy};
use crate::params::ParameterBag;
use crate::resolver::resolve;
use crate::strategy::plan_call;

/// Everything a dispatcher needs, fixed at startup
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Target database
    pub connection: ConnectionConfig,

    /// Schema whose objects are exposed
    pub schema: String,

    pub capabilities: Capabilities,

    pub response: ResponsePolicy,

    /// Replace engine error text in responses with a generic message
    pub redact_errors: bool,
}

impl GatewayConfig {
    /// Read-only configuration exposing the engine's default schema
    #[must_use]
    pub fn new(connection: ConnectionConfig) -> Self {
        let schema = connection.engine.default_schema().to_string();
        Self {
            connection,
            schema,
            capabilities: Capabilities::read_only(),
            response: ResponsePolicy::default(),
            redact_errors: false,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// One inbound invocation
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub method: Method,
    pub resource: String,
    pub action: String,
    pub params: ParameterBag,
}

impl InvocationRequest {
    pub fn new(
        method: Method,
        resource: impl Into<String>,
        action: impl Into<String>,
        params: ParameterBag,
    ) -> Self {
        Self { method, resource: resource.into(), action: action.into(), params }
    }
}

/// Invokes database objects through engine `E`
pub struct Dispatcher<E> {
    config: GatewayConfig,
    _engine: PhantomData<fn() -> E>,
}

impl<E> std::fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("config", &self.config).finish()
    }
}

impl<E: DatabaseEngine> Dispatcher<E> {
    /// Create a dispatcher
    ///
    /// Fails when the configured schema is not a valid identifier or the
    /// connection targets a different engine.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        identifier::validate(&config.schema)?;
        config.connection.expect_engine(E::ENGINE)?;
        Ok(Self { config, _engine: PhantomData })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub const fn engine(&self) -> DatabaseType {
        E::ENGINE
    }

    /// Handle a `/{resource}/{action}` invocation
    pub async fn dispatch(&self, request: InvocationRequest) -> Result<Value> {
        let name = resolve(&request.resource, &request.action);
        debug!(
            resource = %request.resource,
            action = %request.action,
            object = %name,
            "Resolved"
        );
        self.invoke_object(request.method, &name, &request.params).await
    }

    /// Invoke an object by its canonical name
    pub async fn invoke_object(
        &self,
        method: Method,
        name: &str,
        params: &ParameterBag,
    ) -> Result<Value> {
        let started = Instant::now();
        let outcome = self.run(method, name, params).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &outcome {
            Ok(_) => info!(%method, object = name, elapsed_ms, "Responded"),
            Err(e) if e.status_code() >= 500 => {
                error!(%method, object = name, elapsed_ms, code = e.error_code(), error = %e, "Errored");
            }
            Err(e) => {
                info!(%method, object = name, elapsed_ms, code = e.error_code(), "Errored");
            }
        }

        outcome
    }

    async fn run(&self, method: Method, name: &str, params: &ParameterBag) -> Result<Value> {
        identifier::validate(name)?;
        let schema = self.config.schema.as_str();

        let object = E::classify(&self.config.connection, schema, name).await?;
        if object.kind == ObjectKind::Unknown {
            return Err(GateError::not_found(schema, name));
        }
        debug!(object = %object.qualified_name(), kind = %object.kind, "Classified");

        check_invocation(method, object.kind, &self.config.capabilities)?;

        let plan = plan_call(E::ENGINE, &object, params)?;
        debug!(sql = %plan.sql, binds = plan.binds.len(), "Planned");

        let result = match self.execute(&plan).await? {
            InvocationResult::Rows(mut rows) => {
                apply_row_limit(&mut rows, &self.config.capabilities, &object.qualified_name());
                InvocationResult::Rows(rows)
            }
            text => text,
        };
        debug!(object = %object.qualified_name(), "Invoked");

        normalize(result, &object, self.config.response)
    }

    async fn execute(&self, plan: &CallPlan) -> Result<InvocationResult> {
        let call = E::execute(&self.config.connection, plan);
        match self.config.capabilities.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), call)
                .await
                .map_err(|_| GateError::execution_failed(format!("call timed out after {ms} ms")))?,
            None => call.await,
        }
    }

    /// Check that the database is reachable
    pub async fn health(&self) -> Result<ConnectionInfo> {
        E::validate_connection(&self.config.connection).await
    }

    /// Every invocable object in the configured schema
    pub async fn list_objects(&self) -> Result<Vec<ObjectDescriptor>> {
        E::list_objects(&self.config.connection, &self.config.schema).await
    }
}
