//! sqlgate CLI Entry Point
//!
//! Subcommands:
//! - `serve` - HTTP gateway
//! - `mcp` - MCP server over stdio
//! - `connect` - validate (and optionally save) a connection
//!
//! Logs go to stderr; stdout carries only JSON (`connect` envelopes, MCP).

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sqlgate::{
    config, Capabilities, ConfigLocation, ConnectionConfig, ConnectionInfo, DatabaseEngine,
    DatabaseType, Dispatcher, ErrorEnvelope, GateError, GatewayConfig, Metadata, ResponsePolicy,
    StoredConnection, SuccessEnvelope,
};

#[cfg(feature = "mssql")]
use sqlgate::engine::mssql::SqlServerEngine;
#[cfg(feature = "postgres")]
use sqlgate::engine::postgres::PostgresEngine;
#[cfg(feature = "sqlite")]
use sqlgate::engine::sqlite::SqliteEngine;

const PASSWORD_ENV: &str = "SQLGATE_PASSWORD";
const DEFAULT_SQL_SERVER_DATABASE: &str = "msdb";

/// sqlgate - expose database views, functions and procedures as JSON endpoints
#[derive(Parser)]
#[command(name = "sqlgate")]
#[command(about = "Convention-routed HTTP gateway for database views, functions and procedures")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve `/{resource}/{action}` over HTTP
    Serve {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        gateway: GatewayArgs,

        /// Address to bind
        #[arg(long, env = "SQLGATE_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to bind
        #[arg(long, env = "SQLGATE_PORT", default_value_t = 51433)]
        port: u16,
    },

    /// Serve objects as MCP tools over stdio
    Mcp {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        gateway: GatewayArgs,
    },

    /// Validate a connection and optionally save it
    Connect {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Save to `local` (.sqlgate/config.json) or `global` (user config dir)
        #[arg(long)]
        save: Option<ConfigLocation>,

        /// Name to save the connection under
        #[arg(long, default_value = "default")]
        name: String,

        /// Mark the saved connection read-only
        #[arg(long)]
        read_only: bool,

        /// Schema to store with the saved connection
        #[arg(long)]
        schema: Option<String>,
    },
}

/// Where to connect
#[derive(Args, Clone)]
struct ConnectionArgs {
    /// Saved connection name (local config first, then global)
    #[arg(long, env = "SQLGATE_CONNECTION")]
    connection: Option<String>,

    /// Database engine: mssql, postgres or sqlite
    #[arg(long, env = "SQLGATE_ENGINE")]
    engine: Option<DatabaseType>,

    /// Database server hostname
    #[arg(long, env = "SQLGATE_SERVER")]
    server: Option<String>,

    /// Database server port
    #[arg(long, env = "SQLGATE_DB_PORT")]
    db_port: Option<u16>,

    /// Database user
    #[arg(long, env = "SQLGATE_USER")]
    user: Option<String>,

    /// Database name
    #[arg(long, env = "SQLGATE_DATABASE")]
    database: Option<String>,

    /// Database file (sqlite)
    #[arg(long, env = "SQLGATE_FILE")]
    file: Option<PathBuf>,

    /// Environment variable holding the password
    #[arg(long)]
    password_env: Option<String>,

    /// Accept the server certificate without validation (mssql)
    #[arg(long)]
    trust_cert: bool,
}

/// How objects are exposed
#[derive(Args, Clone)]
struct GatewayArgs {
    /// Schema whose objects are exposed (default: pupy, main for sqlite)
    #[arg(long, env = "SQLGATE_SCHEMA")]
    schema: Option<String>,

    /// Reject procedure calls
    #[arg(long)]
    read_only: bool,

    /// Truncate row sets to this many rows
    #[arg(long)]
    max_rows: Option<usize>,

    /// Fail calls that run longer than this
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Fail procedure calls whose response is not JSON
    #[arg(long)]
    strict_procedure_json: bool,

    /// Hide engine error text from responses
    #[arg(long)]
    redact_errors: bool,
}

/// Connection resolved from flags or saved config
struct Target {
    config: ConnectionConfig,
    readonly: bool,
    schema: Option<String>,
}

enum Surface {
    Http { host: String, port: u16 },
    Mcp,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Serve { connection, gateway, host, port } => {
            run(&connection, &gateway, Surface::Http { host, port }).await
        }
        Commands::Mcp { connection, gateway } => run(&connection, &gateway, Surface::Mcp).await,
        Commands::Connect { connection, save, name, read_only, schema } => {
            connect(&connection, save, &name, read_only, schema).await
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(args: &ConnectionArgs, gateway: &GatewayArgs, surface: Surface) -> anyhow::Result<()> {
    let target = resolve_target(args)?;
    let config = gateway_config(target, gateway);

    match config.connection.engine {
        #[cfg(feature = "mssql")]
        DatabaseType::SqlServer => start::<SqlServerEngine>(config, surface).await,
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => start::<PostgresEngine>(config, surface).await,
        #[cfg(feature = "sqlite")]
        DatabaseType::SQLite => start::<SqliteEngine>(config, surface).await,
        #[allow(unreachable_patterns)]
        other => Err(anyhow!("engine '{other}' is not enabled in this build")),
    }
}

/// Validate the connection, then serve on `surface`
async fn start<E: DatabaseEngine + 'static>(config: GatewayConfig, surface: Surface) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::<E>::new(config)?;

    let info = dispatcher.health().await.context("Startup connection check failed")?;
    info!(
        engine = %dispatcher.engine(),
        version = %info.database_version,
        database = %info.connected_database,
        user = %info.user,
        "Connected"
    );

    match surface {
        Surface::Http { host, port } => sqlgate::http::serve(dispatcher, &host, port).await,
        Surface::Mcp => sqlgate::mcp::serve(dispatcher).await,
    }
}

fn gateway_config(target: Target, args: &GatewayArgs) -> GatewayConfig {
    let read_only = args.read_only || target.readonly;
    let capabilities = Capabilities {
        allow_write: !read_only,
        max_rows: args.max_rows,
        timeout_ms: args.timeout_ms,
    };

    let mut config = GatewayConfig::new(target.config).with_capabilities(capabilities);
    if let Some(schema) = args.schema.clone().or(target.schema) {
        config = config.with_schema(schema);
    }
    config.response = ResponsePolicy { strict_procedure_json: args.strict_procedure_json };
    config.redact_errors = args.redact_errors;
    config
}

/// Explicit flags win; otherwise a saved connection (named or default)
fn resolve_target(args: &ConnectionArgs) -> anyhow::Result<Target> {
    let Some(engine) = args.engine else {
        let resolved = config::resolve_connection(args.connection.as_deref()).context(
            "No --engine given and no usable saved connection; pass --engine or --connection",
        )?;
        return Ok(Target { config: resolved.config, readonly: resolved.readonly, schema: resolved.schema });
    };

    let config = match engine {
        DatabaseType::SQLite => {
            let file = args.file.clone().ok_or_else(|| anyhow!("--file is required for sqlite"))?;
            ConnectionConfig::sqlite(file)
        }
        DatabaseType::SqlServer | DatabaseType::Postgres => {
            let user = args
                .user
                .clone()
                .ok_or_else(|| anyhow!("--user is required; integrated authentication is not supported"))?;
            let database = match (&args.database, engine) {
                (Some(db), _) => db.clone(),
                (None, DatabaseType::SqlServer) => prompt_database(DEFAULT_SQL_SERVER_DATABASE)?,
                (None, _) => user.clone(),
            };
            let mut config = ConnectionConfig {
                engine,
                host: Some(args.server.clone().unwrap_or_else(|| "localhost".to_string())),
                port: Some(args.db_port.or(engine.default_port()).unwrap_or(1433)),
                user: Some(user),
                password: Some(read_password(args.password_env.as_deref())?),
                database: Some(database),
                file: None,
                trust_cert: args.trust_cert,
            };
            if engine != DatabaseType::SqlServer {
                config.trust_cert = false;
            }
            config
        }
    };

    Ok(Target { config, readonly: false, schema: None })
}

/// `--password-env`, then `SQLGATE_PASSWORD`, then an interactive prompt
fn read_password(password_env: Option<&str>) -> anyhow::Result<String> {
    if let Some(var) = password_env {
        return std::env::var(var).with_context(|| format!("Environment variable {var} is not set"));
    }
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    if !std::io::stdin().is_terminal() {
        return Err(anyhow!("No password: set {PASSWORD_ENV} or pass --password-env"));
    }
    Ok(dialoguer::Password::new().with_prompt("Password").interact()?)
}

/// Database name, asked for on a terminal
fn prompt_database(default: &str) -> anyhow::Result<String> {
    if !std::io::stdin().is_terminal() {
        return Ok(default.to_string());
    }
    Ok(dialoguer::Input::<String>::new()
        .with_prompt("Database")
        .default(default.to_string())
        .interact_text()?)
}

async fn validate(config: &ConnectionConfig) -> sqlgate::Result<ConnectionInfo> {
    match config.engine {
        #[cfg(feature = "mssql")]
        DatabaseType::SqlServer => SqlServerEngine::validate_connection(config).await,
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => PostgresEngine::validate_connection(config).await,
        #[cfg(feature = "sqlite")]
        DatabaseType::SQLite => SqliteEngine::validate_connection(config).await,
        #[allow(unreachable_patterns)]
        other => Err(GateError::invalid_input(format!("engine '{other}' is not enabled in this build"))),
    }
}

/// Validate a connection and print a JSON envelope
async fn connect(
    args: &ConnectionArgs,
    save: Option<ConfigLocation>,
    name: &str,
    read_only: bool,
    schema: Option<String>,
) -> anyhow::Result<()> {
    let target = resolve_target(args)?;
    let engine = target.config.engine.as_str();
    let started = Instant::now();

    let info = match validate(&target.config).await {
        Ok(info) => info,
        Err(err) => {
            println!("{}", serde_json::to_string(&ErrorEnvelope::from_error(engine, "connect", &err))?);
            return Err(err.into());
        }
    };

    let saved_to = match save {
        Some(location) => {
            let mut stored = StoredConnection::new(target.config.clone());
            stored.password_env = args.password_env.clone();
            stored.readonly = read_only.then_some(true);
            stored.schema = schema;
            let path = config::save_connection(location, name, stored)?;
            info!(name, path = %path.display(), "Saved connection");
            Some(path)
        }
        None => None,
    };

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let data = serde_json::json!({
        "connection_info": info,
        "saved_to": saved_to,
    });
    println!(
        "{}",
        serde_json::to_string(&SuccessEnvelope::new(engine, "connect", data, Metadata::new(elapsed_ms)))?
    );
    Ok(())
}
