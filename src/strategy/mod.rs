//! Invocation Strategies
//!
//! One strategy per invocable [`ObjectKind`]. A strategy turns a classified
//! object and the caller's parameters into a [`CallPlan`]: SQL text built
//! only from validated, quoted identifiers and placeholders, plus the bound
//! values in placeholder order. Strategies never execute anything; engines
//! run the plans.
//!
//! # Dialects
//! - `SQL Server`: functions take positional arguments in declared order
//!   (unsupplied declared parameters become `DEFAULT`); procedures run as a
//!   batch that captures the `@response` output parameter.
//! - `PostgreSQL`: named notation (`"k" => $1`); procedures are `CALL`ed and
//!   return their `response` OUT argument as a row.
//! - `SQLite`: views only.

pub mod dialect;

use crate::engine::{CallPlan, DatabaseType, ObjectDescriptor, ObjectKind, ResultShape};
use crate::error::{GateError, Result};
use crate::identifier;
use crate::params::{ParamValue, ParameterBag};

use dialect::{placeholder, qualified, quote};

/// Name of the output parameter every exposed procedure declares
pub const RESPONSE_PARAMETER: &str = "response";

/// Builds the call for one object kind
pub trait InvocationStrategy: Sync {
    /// Kind this strategy handles
    fn kind(&self) -> ObjectKind;

    /// Build the SQL text and bind list for invoking `object`
    fn plan(
        &self,
        engine: DatabaseType,
        object: &ObjectDescriptor,
        params: &ParameterBag,
    ) -> Result<CallPlan>;
}

/// `SELECT * FROM schema.view`
pub struct ViewStrategy;

/// `SELECT * FROM schema.function(args)`
pub struct TableFunctionStrategy;

/// `SELECT schema.function(args)`, single text value
pub struct ScalarFunctionStrategy;

/// Procedure call capturing the `response` output parameter
pub struct ProcedureStrategy;

/// Strategy for `kind`, or `None` for [`ObjectKind::Unknown`]
#[must_use]
pub fn strategy_for(kind: ObjectKind) -> Option<&'static dyn InvocationStrategy> {
    match kind {
        ObjectKind::View => Some(&ViewStrategy),
        ObjectKind::TableFunction => Some(&TableFunctionStrategy),
        ObjectKind::ScalarFunction => Some(&ScalarFunctionStrategy),
        ObjectKind::Procedure => Some(&ProcedureStrategy),
        ObjectKind::Unknown => None,
    }
}

/// Plan the invocation of a classified object
pub fn plan_call(
    engine: DatabaseType,
    object: &ObjectDescriptor,
    params: &ParameterBag,
) -> Result<CallPlan> {
    let strategy = strategy_for(object.kind)
        .ok_or_else(|| GateError::not_found(&object.schema, &object.name))?;
    strategy.plan(engine, object, params)
}

impl InvocationStrategy for ViewStrategy {
    fn kind(&self) -> ObjectKind {
        ObjectKind::View
    }

    fn plan(
        &self,
        engine: DatabaseType,
        object: &ObjectDescriptor,
        params: &ParameterBag,
    ) -> Result<CallPlan> {
        validate_names(object, params)?;
        let target = qualified(engine, &object.schema, &object.name)?;

        if params.is_empty() {
            return Ok(CallPlan {
                sql: format!("SELECT * FROM {target}"),
                binds: Vec::new(),
                shape: ResultShape::Rows,
            });
        }

        // Views take no arguments; the engine reports the mismatch
        let mut binds = Binds::new(engine);
        let args: Vec<String> = params.iter().map(|(_, value)| binds.push(value)).collect();
        Ok(CallPlan {
            sql: format!("SELECT * FROM {target}({})", args.join(", ")),
            binds: binds.into_values(),
            shape: ResultShape::Rows,
        })
    }
}

impl InvocationStrategy for TableFunctionStrategy {
    fn kind(&self) -> ObjectKind {
        ObjectKind::TableFunction
    }

    fn plan(
        &self,
        engine: DatabaseType,
        object: &ObjectDescriptor,
        params: &ParameterBag,
    ) -> Result<CallPlan> {
        validate_names(object, params)?;
        let (call, binds) = function_call(engine, object, params)?;
        Ok(CallPlan { sql: format!("SELECT * FROM {call}"), binds, shape: ResultShape::Rows })
    }
}

impl InvocationStrategy for ScalarFunctionStrategy {
    fn kind(&self) -> ObjectKind {
        ObjectKind::ScalarFunction
    }

    fn plan(
        &self,
        engine: DatabaseType,
        object: &ObjectDescriptor,
        params: &ParameterBag,
    ) -> Result<CallPlan> {
        validate_names(object, params)?;
        let (call, binds) = function_call(engine, object, params)?;
        let sql = match engine {
            DatabaseType::Postgres => format!("SELECT ({call})::text AS result"),
            _ => format!("SELECT {call} AS {}", quote(engine, "result")?),
        };
        Ok(CallPlan { sql, binds, shape: ResultShape::Scalar })
    }
}

impl InvocationStrategy for ProcedureStrategy {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Procedure
    }

    fn plan(
        &self,
        engine: DatabaseType,
        object: &ObjectDescriptor,
        params: &ParameterBag,
    ) -> Result<CallPlan> {
        validate_names(object, params)?;
        if let Some((key, _)) = params.get_ignore_case(RESPONSE_PARAMETER) {
            return Err(GateError::invalid_identifier(format!(
                "'{key}' is reserved for the procedure's output parameter"
            )));
        }

        let target = qualified(engine, &object.schema, &object.name)?;
        let mut binds = Binds::new(engine);

        let sql = match engine {
            DatabaseType::SqlServer => {
                let mut args: Vec<String> = params
                    .iter()
                    .map(|(key, value)| format!("@{key} = {}", binds.push(value)))
                    .collect();
                args.push(format!("@{RESPONSE_PARAMETER} = @{RESPONSE_PARAMETER} OUTPUT"));
                format!(
                    "SET NOCOUNT ON; DECLARE @{RESPONSE_PARAMETER} NVARCHAR(MAX); \
                     EXEC {target} {}; SELECT @{RESPONSE_PARAMETER} AS [{RESPONSE_PARAMETER}];",
                    args.join(", ")
                )
            }
            DatabaseType::Postgres => {
                let mut args = named_args(engine, object, params, &mut binds)?;
                args.push(format!("{} => NULL", quote(engine, RESPONSE_PARAMETER)?));
                format!("CALL {target}({})", args.join(", "))
            }
            DatabaseType::SQLite => {
                return Err(GateError::execution_failed(
                    "stored procedures are not supported by sqlite",
                ))
            }
        };

        Ok(CallPlan {
            sql,
            binds: binds.into_values(),
            shape: ResultShape::Output { column: RESPONSE_PARAMETER.to_string() },
        })
    }
}

/// Validate schema, object and every parameter name
fn validate_names(object: &ObjectDescriptor, params: &ParameterBag) -> Result<()> {
    identifier::validate(&object.schema)?;
    identifier::validate(&object.name)?;
    identifier::validate_all(params.names())
}

/// Quoted function call expression and its binds
fn function_call(
    engine: DatabaseType,
    object: &ObjectDescriptor,
    params: &ParameterBag,
) -> Result<(String, Vec<ParamValue>)> {
    let target = qualified(engine, &object.schema, &object.name)?;
    let mut binds = Binds::new(engine);
    let args = match engine {
        DatabaseType::SqlServer => positional_args(object, params, &mut binds),
        DatabaseType::Postgres => named_args(engine, object, params, &mut binds)?,
        DatabaseType::SQLite => {
            return Err(GateError::execution_failed("functions are not supported by sqlite"))
        }
    };
    Ok((format!("{target}({})", args.join(", ")), binds.into_values()))
}

/// Arguments in declared order, `DEFAULT` for missing ones, extras appended
fn positional_args(object: &ObjectDescriptor, params: &ParameterBag, binds: &mut Binds) -> Vec<String> {
    let mut used: Vec<&str> = Vec::new();
    let mut args = Vec::new();

    for declared in object.input_parameters() {
        match params.get_ignore_case(&declared.name) {
            Some((key, value)) => {
                used.push(key);
                args.push(binds.push(value));
            }
            None => args.push("DEFAULT".to_string()),
        }
    }

    for (key, value) in params.iter() {
        if !used.contains(&key) {
            args.push(binds.push(value));
        }
    }

    args
}

/// `"name" => $n` for every parameter, in key order, spelled as declared
fn named_args(
    engine: DatabaseType,
    object: &ObjectDescriptor,
    params: &ParameterBag,
    binds: &mut Binds,
) -> Result<Vec<String>> {
    params
        .iter()
        .map(|(key, value)| {
            let name = object
                .input_parameters()
                .find(|declared| declared.name.eq_ignore_ascii_case(key))
                .map_or(key, |declared| declared.name.as_str());
            Ok(format!("{} => {}", quote(engine, name)?, binds.push(value)))
        })
        .collect()
}

/// Accumulates bound values and hands out their placeholders
struct Binds {
    engine: DatabaseType,
    values: Vec<ParamValue>,
}

impl Binds {
    fn new(engine: DatabaseType) -> Self {
        Self { engine, values: Vec::new() }
    }

    fn push(&mut self, value: &ParamValue) -> String {
        self.values.push(value.clone());
        placeholder(self.engine, self.values.len())
    }

    fn into_values(self) -> Vec<ParamValue> {
        self.values
    }
}
