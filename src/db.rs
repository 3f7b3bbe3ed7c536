//! In-memory SQLite materialization for sampler resources
//!
//! Samplers describe a queryable resource as a plain mapping of relation
//! name to a list of row objects. Before the solution runs, that mapping is
//! loaded into an in-memory SQLite database so the solution sees a live
//! connection; only the raw mapping is ever persisted in a case.

use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::sample::Case;

fn to_sql_value(v: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match v {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        // Nested structures round-trip as their JSON encoding
        other => Sql::Text(other.to_string()),
    }
}

fn from_sql_value(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(r) => Value::from(r),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

/// Materialize a relation-name -> rows mapping into an in-memory database.
///
/// Column names are taken from the first row of each relation; rows missing
/// a column insert NULL. Empty relations are skipped since they carry no
/// column information.
pub fn tables_to_conn(tables: &Value) -> Result<Connection> {
    let tables = tables.as_object().ok_or_else(|| {
        ForgeError::Resource("resource value must be a mapping of table name to rows".to_string())
    })?;
    let conn = Connection::open_in_memory()?;

    for (table, rows) in tables {
        let rows = rows.as_array().ok_or_else(|| {
            ForgeError::Resource(format!("table `{}` must be a list of row objects", table))
        })?;
        let Some(first) = rows.first() else {
            debug!(table = %table, "Skipping empty table");
            continue;
        };
        let first = first.as_object().ok_or_else(|| {
            ForgeError::Resource(format!("table `{}` rows must be objects", table))
        })?;

        let columns: Vec<&String> = first.keys().collect();
        let column_list = columns
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!("CREATE TABLE \"{}\" ({});", table, column_list))?;

        let placeholders = columns
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            table, column_list, placeholders
        );
        let mut stmt = conn.prepare(&insert)?;
        for row in rows {
            let row = row.as_object().ok_or_else(|| {
                ForgeError::Resource(format!("table `{}` rows must be objects", table))
            })?;
            let values = columns
                .iter()
                .map(|c| to_sql_value(row.get(*c).unwrap_or(&Value::Null)));
            stmt.execute(params_from_iter(values))?;
        }
    }
    Ok(conn)
}

/// Run a query against a materialized connection and return the result rows
/// as a list of column-name -> value objects, in result order.
pub fn query_to_rows(conn: &Connection, query: &str) -> Result<Vec<Value>> {
    let mut stmt = conn.prepare(query)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut obj = Case::new();
        for (i, name) in column_names.iter().enumerate() {
            obj.insert(name.clone(), from_sql_value(row.get_ref(i)?));
        }
        out.push(Value::Object(obj));
    }
    Ok(out)
}
