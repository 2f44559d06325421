//! JSON view of [`Value`] for command-line and report use.
//!
//! Bytes travel as `{"$bytes": "<base64>"}` and registered types as
//! `{"$type": "<name>", "value": ...}`; every other object is a map.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use serde_json::{Map, Number};

use crate::value::Value;

const BYTES_KEY: &str = "$bytes";
const TYPE_KEY: &str = "$type";
const TYPE_VALUE_KEY: &str = "value";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonValueError {
    message: String,
}

impl fmt::Display for JsonValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JsonValueError {}

impl Value {
    pub fn from_json(json: &serde_json::Value) -> Result<Value, JsonValueError> {
        Ok(match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => number_value(n),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(obj) => object_value(obj)?,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Uint(n) => serde_json::Value::from(*n),
            Value::Float(x) => Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                let b64 = base64::engine::general_purpose::STANDARD;
                let mut obj = Map::new();
                obj.insert(BYTES_KEY.to_string(), b64.encode(b).into());
                serde_json::Value::Object(obj)
            }
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Named { type_name, value } => {
                let mut obj = Map::new();
                obj.insert(TYPE_KEY.to_string(), type_name.clone().into());
                obj.insert(TYPE_VALUE_KEY.to_string(), value.to_json());
                serde_json::Value::Object(obj)
            }
        }
    }
}

fn number_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else if let Some(u) = n.as_u64() {
        Value::Uint(u)
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn object_value(obj: &Map<String, serde_json::Value>) -> Result<Value, JsonValueError> {
    if obj.len() == 1 {
        if let Some(raw) = obj.get(BYTES_KEY) {
            let Some(text) = raw.as_str() else {
                return Err(JsonValueError {
                    message: format!("{BYTES_KEY} must be a base64 string"),
                });
            };
            let b64 = base64::engine::general_purpose::STANDARD;
            let bytes = b64.decode(text.as_bytes()).map_err(|err| JsonValueError {
                message: format!("decode {BYTES_KEY}: {err}"),
            })?;
            return Ok(Value::Bytes(bytes));
        }
    }
    if let Some(raw) = obj.get(TYPE_KEY) {
        let Some(type_name) = raw.as_str() else {
            return Err(JsonValueError {
                message: format!("{TYPE_KEY} must be a string"),
            });
        };
        let inner = match obj.get(TYPE_VALUE_KEY) {
            Some(v) => Value::from_json(v)?,
            None => Value::Nil,
        };
        return Ok(Value::named(type_name, inner));
    }
    let mut entries = BTreeMap::new();
    for (k, v) in obj {
        entries.insert(k.clone(), Value::from_json(v)?);
    }
    Ok(Value::Map(entries))
}
