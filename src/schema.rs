//! DDL statement builders
//!
//! Table, column and index DDL is assembled here from validated identifiers
//! and screened type strings, then executed over the write connection by
//! the manager. Builders only produce SQL; they never touch a connection.

use crate::error::{Error, Result};
use crate::security::{quote_identifier, validate_type_name};

/// Build a `CREATE TABLE IF NOT EXISTS` statement.
///
/// `columns` pairs each column name with its type specification, in order.
pub fn create_table_sql(table: &str, columns: &[(String, String)]) -> Result<String> {
    if columns.is_empty() {
        return Err(Error::config("cannot create a table with no columns"));
    }

    let table = quote_identifier(table)?;
    let mut defs = Vec::with_capacity(columns.len());
    for (name, type_name) in columns {
        let name = quote_identifier(name)?;
        validate_type_name(type_name)?;
        defs.push(format!("{name} {type_name}"));
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} ({})",
        defs.join(", ")
    ))
}

/// Build a `DROP TABLE IF EXISTS` statement
pub fn drop_table_sql(table: &str) -> Result<String> {
    let table = quote_identifier(table)?;
    Ok(format!("DROP TABLE IF EXISTS {table}"))
}

/// Build an `ALTER TABLE ... ADD COLUMN` statement for one or more columns
pub fn add_columns_sql(table: &str, columns: &[(String, String)]) -> Result<String> {
    if columns.is_empty() {
        return Err(Error::config("no columns to add"));
    }

    let table = quote_identifier(table)?;
    let mut clauses = Vec::with_capacity(columns.len());
    for (name, type_name) in columns {
        let name = quote_identifier(name)?;
        validate_type_name(type_name)?;
        clauses.push(format!("ADD COLUMN {name} {type_name}"));
    }
    Ok(format!("ALTER TABLE {table} {}", clauses.join(", ")))
}

/// Build a `CREATE [UNIQUE] INDEX` statement over the given columns
pub fn create_index_sql(
    table: &str,
    index: &str,
    columns: &[String],
    unique: bool,
) -> Result<String> {
    if columns.is_empty() {
        return Err(Error::config("no columns to index"));
    }

    let table = quote_identifier(table)?;
    let index = quote_identifier(index)?;
    let mut cols = Vec::with_capacity(columns.len());
    for name in columns {
        cols.push(quote_identifier(name)?);
    }
    let unique = if unique { "UNIQUE " } else { "" };
    Ok(format!(
        "CREATE {unique}INDEX {index} ON {table} ({})",
        cols.join(", ")
    ))
}

/// Build the column-listing query for a table
pub fn table_columns_sql(table: &str) -> Result<String> {
    let table = quote_identifier(table)?;
    Ok(format!("SHOW COLUMNS FROM {table}"))
}
