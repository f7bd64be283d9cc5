//! Per-engine SQL spelling: identifier quoting and bind placeholders

use crate::engine::DatabaseType;
use crate::error::Result;
use crate::identifier;

/// Quote a validated identifier for `engine`
///
/// Validation runs first, so the quote characters can never appear inside.
pub fn quote(engine: DatabaseType, ident: &str) -> Result<String> {
    let ident = identifier::validate(ident)?;
    Ok(match engine {
        DatabaseType::SqlServer => format!("[{ident}]"),
        DatabaseType::Postgres | DatabaseType::SQLite => format!("\"{ident}\""),
    })
}

/// Quoted `schema.name`
pub fn qualified(engine: DatabaseType, schema: &str, name: &str) -> Result<String> {
    Ok(format!("{}.{}", quote(engine, schema)?, quote(engine, name)?))
}

/// Placeholder for the 1-based bind position `n`
#[must_use]
pub fn placeholder(engine: DatabaseType, n: usize) -> String {
    match engine {
        DatabaseType::SqlServer => format!("@P{n}"),
        DatabaseType::Postgres => format!("${n}"),
        DatabaseType::SQLite => format!("?{n}"),
    }
}
