//! Conversions between libSQL values and model fields

use libsql::{Row, Value};

use crate::error::{Error, Result};

pub fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(Error::Database(format!(
            "expected TEXT or NULL in column {idx}, found {other:?}"
        ))),
    }
}

pub fn opt_int(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected INTEGER or NULL in column {idx}, found {other:?}"
        ))),
    }
}

pub fn json(row: &Row, idx: i32) -> Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn opt_json(row: &Row, idx: i32) -> Result<Option<serde_json::Value>> {
    opt_text(row, idx)?
        .map(|raw| serde_json::from_str(&raw).map_err(Error::from))
        .transpose()
}

pub fn text_or_null(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

pub fn int_or_null(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

pub fn json_or_null(value: Option<&serde_json::Value>) -> Result<Value> {
    value.map_or(Ok(Value::Null), |payload| {
        Ok(Value::Text(serde_json::to_string(payload)?))
    })
}

/// SQLite LIMIT takes a signed integer
pub fn limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
