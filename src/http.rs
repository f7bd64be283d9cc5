//! HTTP Surface
//!
//! Maps `/{resource}/{action}` requests onto [`Dispatcher`] invocations.
//!
//! - `GET` sources parameters from the query string only.
//! - `POST` merges a JSON object body over the query string; any other
//!   body counts as no parameters.
//! - Success returns the normalized JSON directly; failures return
//!   `{"detail": ..., "code": ...}` with the error's status.
//!
//! The MCP tools are also reachable over HTTP under `/api/tools`:
//! `GET list`, `POST call` (`{"toolName", "arguments"}`),
//! `GET call/{toolName}` (query arguments) and `GET connection-test`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::capability::Method;
use crate::dispatch::{Dispatcher, InvocationRequest};
use crate::engine::DatabaseEngine;
use crate::error::GateError;
use crate::mcp::tool_definitions;
use crate::output::{ErrorBody, HealthReport};
use crate::params::ParameterBag;

type QueryPairs = Result<Query<Vec<(String, String)>>, QueryRejection>;

/// Handler outcome: the success response or a ready error response
type Reply = Result<Response, Response>;

/// Build the router for `dispatcher`
pub fn router<E>(dispatcher: Arc<Dispatcher<E>>) -> Router
where
    E: DatabaseEngine + 'static,
{
    Router::new()
        .route("/", get(service_info::<E>))
        .route("/health", get(health::<E>))
        .route("/api/tools/list", get(list_tools::<E>))
        .route("/api/tools/call", post(call_tool::<E>))
        .route("/api/tools/call/:tool", get(call_tool_by_name::<E>))
        .route("/api/tools/connection-test", get(health::<E>))
        .route("/:resource", get(get_resource::<E>).post(post_resource::<E>))
        .route("/:resource/:action", get(get_action::<E>).post(post_action::<E>))
        .with_state(dispatcher)
}

/// Bind `host:port` and serve until the process is stopped
pub async fn serve<E>(dispatcher: Dispatcher<E>, host: &str, port: u16) -> anyhow::Result<()>
where
    E: DatabaseEngine + 'static,
{
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, engine = %dispatcher.engine(), schema = %dispatcher.config().schema, "Listening");

    axum::serve(listener, router(Arc::new(dispatcher))).await?;
    Ok(())
}

/// Convert a dispatcher error into a status and error body
fn error_response(err: &GateError, redact: bool) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if redact && err.carries_engine_detail() {
        error!(code = err.error_code(), error = %err, "Redacted error response");
    }
    (status, Json(ErrorBody::from_error(err, redact))).into_response()
}

/// Query pairs, or a 400 error body when the query string is rejected
fn query_pairs(query: QueryPairs) -> Result<Vec<(String, String)>, Response> {
    query
        .map(|Query(pairs)| pairs)
        .map_err(|rejection| error_response(&GateError::invalid_input(rejection.body_text()), false))
}

async fn invoke<E: DatabaseEngine>(dispatcher: &Dispatcher<E>, request: InvocationRequest) -> Reply {
    reply(dispatcher, dispatcher.dispatch(request).await)
}

fn reply<E: DatabaseEngine>(dispatcher: &Dispatcher<E>, outcome: crate::error::Result<Value>) -> Reply {
    outcome
        .map(|value| Json(value).into_response())
        .map_err(|err| error_response(&err, dispatcher.config().redact_errors))
}

fn post_params(pairs: Vec<(String, String)>, body: &[u8]) -> ParameterBag {
    let mut params = ParameterBag::from_query(pairs);
    params.merge_body(body);
    params
}

async fn get_action<E: DatabaseEngine>(
    State(dispatcher): State<Arc<Dispatcher<E>>>,
    Path((resource, action)): Path<(String, String)>,
    query: QueryPairs,
) -> Reply {
    let params = ParameterBag::from_query(query_pairs(query)?);
    invoke(&dispatcher, InvocationRequest::new(Method::Get, resource, action, params)).await
}

async fn post_action<E: DatabaseEngine>(
    State(dispatcher): State<Arc<Dispatcher<E>>>,
    Path((resource, action)): Path<(String, String)>,
    query: QueryPairs,
    body: Bytes,
) -> Reply {
    let params = post_params(query_pairs(query)?, &body);
    invoke(&dispatcher, InvocationRequest::new(Method::Post, resource, action, params)).await
}

async fn get_resource<E: DatabaseEngine>(
    State(dispatcher): State<Arc<Dispatcher<E>>>,
    Path(resource): Path<String>,
    query: QueryPairs,
) -> Reply {
    let params = ParameterBag::from_query(query_pairs(query)?);
    invoke(&dispatcher, InvocationRequest::new(Method::Get, resource, "", params)).await
}

async fn post_resource<E: DatabaseEngine>(
    State(dispatcher): State<Arc<Dispatcher<E>>>,
    Path(resource): Path<String>,
    query: QueryPairs,
    body: Bytes,
) -> Reply {
    let params = post_params(query_pairs(query)?, &body);
    invoke(&dispatcher, InvocationRequest::new(Method::Post, resource, "", params)).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallRequest {
    #[serde(default, alias = "name")]
    tool_name: String,

    #[serde(default)]
    arguments: Option<serde_json::Map<String, Value>>,
}

async fn list_tools<E: DatabaseEngine>(State(dispatcher): State<Arc<Dispatcher<E>>>) -> Reply {
    let tools = tool_definitions(&dispatcher).await.map(|tools| json!({ "tools": tools }));
    reply(&dispatcher, tools)
}

/// Tool calls by body run with `POST` semantics, like MCP `tools/call`
async fn call_tool<E: DatabaseEngine>(
    State(dispatcher): State<Arc<Dispatcher<E>>>,
    request: Result<Json<ToolCallRequest>, JsonRejection>,
) -> Reply {
    let Json(request) = request.map_err(|rejection| {
        error_response(&GateError::invalid_input(rejection.body_text()), false)
    })?;

    if request.tool_name.trim().is_empty() {
        return Err(error_response(&GateError::invalid_input("toolName is required"), false));
    }

    let mut params = ParameterBag::new();
    if let Some(arguments) = request.arguments {
        params.merge_json_object(arguments);
    }

    reply(&dispatcher, dispatcher.invoke_object(Method::Post, &request.tool_name, &params).await)
}

/// Tool calls by URL run with `GET` semantics, so procedures are refused
async fn call_tool_by_name<E: DatabaseEngine>(
    State(dispatcher): State<Arc<Dispatcher<E>>>,
    Path(tool): Path<String>,
    query: QueryPairs,
) -> Reply {
    let params = ParameterBag::from_query(query_pairs(query)?);
    reply(&dispatcher, dispatcher.invoke_object(Method::Get, &tool, &params).await)
}

async fn health<E: DatabaseEngine>(State(dispatcher): State<Arc<Dispatcher<E>>>) -> Response {
    match dispatcher.health().await {
        Ok(info) => {
            (StatusCode::OK, Json(HealthReport::healthy(info.connected_database, info.database_version)))
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "Health check failed");
            let detail = ErrorBody::from_error(&err, dispatcher.config().redact_errors).detail;
            (StatusCode::SERVICE_UNAVAILABLE, Json(HealthReport::unhealthy(detail))).into_response()
        }
    }
}

async fn service_info<E: DatabaseEngine>(State(dispatcher): State<Arc<Dispatcher<E>>>) -> Response {
    let config = dispatcher.config();
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "engine": dispatcher.engine(),
        "database": config.connection.database_label(),
        "schema": config.schema,
        "read_only": !config.capabilities.can_write(),
        "endpoints": [
            "/health",
            "/{resource}/{action}",
            "/api/tools/list",
            "/api/tools/call",
            "/api/tools/call/{toolName}",
            "/api/tools/connection-test",
        ],
    }))
    .into_response()
}
