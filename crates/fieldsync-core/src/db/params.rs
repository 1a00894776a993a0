//! Small helpers for building and reading libSQL values

use libsql::{Row, Value};

use crate::error::{Error, Result};

pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn opt_text(value: Option<impl Into<String>>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.into()))
}

pub const fn int(value: i64) -> Value {
    Value::Integer(value)
}

pub fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

/// Read a nullable integer column
pub fn nullable_int(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Integer(value) => Ok(Some(value)),
        Value::Null => Ok(None),
        other => Err(Error::Database(format!(
            "expected integer in column {idx}, found {other:?}"
        ))),
    }
}

/// Parse a stored enum/text value, mapping failures to a database error
pub fn parse_column<T>(raw: &str, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|error| Error::Database(format!("corrupt {column} column: {error}")))
}
