//! Configuration Management
//!
//! This module handles loading and saving named database connections.
//!
//! # Configuration Locations
//! - Local: `.sqlgate/config.json` (team-shareable, per-project)
//! - Global: `<config dir>/sqlgate/connections.json` (per-user)
//!
//! Both files share one format:
//! ```json
//! {
//!   "connections": {
//!     "prod": { "engine": "mssql", "host": "db1", "password_env": "PROD_PW", "readonly": true }
//!   },
//!   "default": "prod"
//! }
//! ```
//!
//! # Resolution Precedence
//! 1. Explicit command-line parameters (handled by the CLI)
//! 2. Local config file
//! 3. Global config file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::ConnectionConfig;
use crate::error::{GateError, Result};

/// Named connections plus a default pointer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionRegistry {
    #[serde(default)]
    pub connections: BTreeMap<String, StoredConnection>,

    /// Name of the default connection (must exist in connections map)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Stored connection configuration
///
/// Like `ConnectionConfig`, but the password may be an environment variable
/// reference instead of a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConnection {
    #[serde(flatten)]
    pub config: ConnectionConfig,

    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Force read-only capabilities (no procedures)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,

    /// Schema to expose instead of the engine default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

/// A stored connection with its password resolved
#[derive(Debug, Clone)]
pub struct ResolvedConnection {
    pub config: ConnectionConfig,
    pub readonly: bool,
    pub schema: Option<String>,
}

impl StoredConnection {
    #[must_use]
    pub const fn new(config: ConnectionConfig) -> Self {
        Self { config, password_env: None, readonly: None, schema: None }
    }

    /// Resolve the password reference
    pub fn resolve(&self) -> Result<ResolvedConnection> {
        let mut config = self.config.clone();

        if let Some(env_var) = &self.password_env {
            match std::env::var(env_var) {
                Ok(password) => config.password = Some(password),
                Err(_) => {
                    return Err(GateError::config_error(format!(
                        "Environment variable {env_var} not found for password"
                    )));
                }
            }
        }

        Ok(ResolvedConnection {
            config,
            readonly: self.readonly.unwrap_or(false),
            schema: self.schema.clone(),
        })
    }
}

impl ConnectionRegistry {
    /// Resolve `name`, or the default connection when `name` is `None`
    pub fn resolve(&self, name: Option<&str>) -> Result<ResolvedConnection> {
        let available = || self.connections.keys().cloned().collect::<Vec<_>>().join(", ");

        let conn_name = match name {
            Some(n) => n,
            None => self.default.as_deref().ok_or_else(|| {
                GateError::config_error(format!(
                    "No default connection set. Available connections: [{}]. \
                     Pick one with --connection.",
                    available()
                ))
            })?,
        };

        let stored = self.connections.get(conn_name).ok_or_else(|| {
            GateError::config_error(format!(
                "Connection '{conn_name}' not found. Available connections: [{}]",
                available()
            ))
        })?;

        stored.resolve()
    }

    /// Overlay `local` on `self`: local entries and default win
    #[must_use]
    pub fn merged_with(mut self, local: Self) -> Self {
        self.connections.extend(local.connections);
        if local.default.is_some() {
            self.default = local.default;
        }
        self
    }

    /// Insert or replace a connection; the first one becomes the default
    pub fn insert(&mut self, name: impl Into<String>, connection: StoredConnection) {
        let name = name.into();
        if self.connections.is_empty() {
            self.default = Some(name.clone());
        }
        self.connections.insert(name, connection);
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// `.sqlgate/config.json` in the current directory
    Local,
    /// `<config dir>/sqlgate/connections.json`
    Global,
}

impl std::str::FromStr for ConfigLocation {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "global" => Ok(Self::Global),
            other => Err(GateError::config_error(format!(
                "Unknown config location '{other}', expected 'local' or 'global'"
            ))),
        }
    }
}

impl ConfigLocation {
    /// Path of the config file for this location
    pub fn path(self) -> Result<PathBuf> {
        match self {
            Self::Local => local_config_path(),
            Self::Global => global_config_path(),
        }
    }
}

/// Get path to local config file (`.sqlgate/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        GateError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".sqlgate").join("config.json"))
}

/// Get path to global config file
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| GateError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("sqlgate").join("connections.json"))
}

/// Load a registry; a missing file is an empty registry
pub fn load_registry(path: &Path) -> Result<ConnectionRegistry> {
    if !path.exists() {
        return Ok(ConnectionRegistry::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| GateError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str::<ConnectionRegistry>(&contents).map_err(|e| {
        GateError::config_error(format!("Invalid config file format in {}: {e}", path.display()))
    })
}

/// Save a registry, creating parent directories as needed
pub fn save_registry(path: &Path, registry: &ConnectionRegistry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            GateError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(registry)
        .map_err(|e| GateError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| GateError::config_error(format!("Could not write config file: {e}")))?;

    Ok(())
}

/// Load global then local config, local taking precedence
pub fn load_with_precedence() -> Result<ConnectionRegistry> {
    let global = load_registry(&global_config_path()?)?;
    let local = load_registry(&local_config_path()?)?;
    Ok(global.merged_with(local))
}

/// Resolve a saved connection by name (or the default)
pub fn resolve_connection(name: Option<&str>) -> Result<ResolvedConnection> {
    load_with_precedence()?.resolve(name)
}

/// Save a connection under `name`, returning the file written
///
/// A literal password is dropped when `password_env` is set.
pub fn save_connection(
    location: ConfigLocation,
    name: &str,
    mut connection: StoredConnection,
) -> Result<PathBuf> {
    if connection.password_env.is_some() {
        connection.config.password = None;
    }

    let path = location.path()?;
    let mut registry = load_registry(&path)?;
    registry.insert(name, connection);
    save_registry(&path, &registry)?;

    Ok(path)
}
