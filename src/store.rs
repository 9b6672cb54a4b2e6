//! SQLite plumbing shared by the loader and analytics
//!
//! Conversions between JSON cells and SQLite values, connection opening, and
//! a generic SELECT runner that keeps column order.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::path::Path;

/// Result set of one SELECT, columns in query order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Open (and create if needed) the store for reading and writing
pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open(path)
}

/// Open an existing store without ever creating the file
pub fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

/// Run a query and collect every row
pub fn select(conn: &Connection, sql: &str) -> rusqlite::Result<QueryRows> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut result = QueryRows {
        columns,
        rows: Vec::new(),
    };

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut record = Map::with_capacity(result.columns.len());
        for (idx, name) in result.columns.iter().enumerate() {
            record.insert(name.clone(), from_sql(row.get_ref(idx)?));
        }
        result.rows.push(record);
    }

    Ok(result)
}

/// JSON cell -> SQLite value (booleans stored as 0/1)
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// SQLite value -> JSON cell
pub fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
