//! Native value model shared by the policy side and the store side.
//!
//! [`NativeValue`] is the tagged variant every conversion goes through:
//! policy terms are decoded into it ([`term`]), filters are built from it
//! and store documents are decoded into it ([`document`]).

pub mod document;
pub mod term;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A mapping from field name to value.
pub type Mapping = BTreeMap<String, NativeValue>;

/// Ordered documents returned by one query.
pub type ResultSet = Vec<Mapping>;

/// A JSON-like value with explicit scalar types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NativeValue {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Ordered sequence of values
    Sequence(Vec<NativeValue>),
    /// String-keyed mapping
    Mapping(Mapping),
}

impl NativeValue {
    /// Short name of the value's kind, used in type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            NativeValue::Null => "null",
            NativeValue::Boolean(_) => "boolean",
            NativeValue::Integer(_) | NativeValue::Float(_) => "number",
            NativeValue::String(_) => "string",
            NativeValue::Sequence(_) => "array",
            NativeValue::Mapping(_) => "object",
        }
    }

    /// Borrow the string, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the mapping, if this is a mapping.
    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            NativeValue::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the sequence, if this is a sequence.
    pub fn as_sequence(&self) -> Option<&[NativeValue]> {
        match self {
            NativeValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Convert into JSON, failing on non-finite floats.
    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        to_json_at(self, "")
    }
}

fn to_json_at(value: &NativeValue, path: &str) -> crate::Result<serde_json::Value> {
    Ok(match value {
        NativeValue::Null => serde_json::Value::Null,
        NativeValue::Boolean(b) => serde_json::Value::Bool(*b),
        NativeValue::Integer(n) => serde_json::Value::from(*n),
        NativeValue::Float(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                crate::Error::encoding(format!("non-finite number {}", n), display_path(path))
            })?,
        NativeValue::String(s) => serde_json::Value::String(s.clone()),
        NativeValue::Sequence(items) => serde_json::Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| to_json_at(item, &child_path(path, &i.to_string())))
                .collect::<crate::Result<_>>()?,
        ),
        NativeValue::Mapping(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_json_at(v, &child_path(path, k))?)))
                .collect::<crate::Result<_>>()?,
        ),
    })
}

/// Join a dotted field path.
pub(crate) fn child_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", parent, field)
    }
}

pub(crate) fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

impl From<&str> for NativeValue {
    fn from(s: &str) -> Self {
        NativeValue::String(s.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(s: String) -> Self {
        NativeValue::String(s)
    }
}

impl From<i64> for NativeValue {
    fn from(n: i64) -> Self {
        NativeValue::Integer(n)
    }
}

impl From<i32> for NativeValue {
    fn from(n: i32) -> Self {
        NativeValue::Integer(n as i64)
    }
}

impl From<f64> for NativeValue {
    fn from(n: f64) -> Self {
        NativeValue::Float(n)
    }
}

impl From<bool> for NativeValue {
    fn from(b: bool) -> Self {
        NativeValue::Boolean(b)
    }
}

impl From<Mapping> for NativeValue {
    fn from(m: Mapping) -> Self {
        NativeValue::Mapping(m)
    }
}

impl<T: Into<NativeValue>> From<Vec<T>> for NativeValue {
    fn from(v: Vec<T>) -> Self {
        NativeValue::Sequence(v.into_iter().map(|x| x.into()).collect())
    }
}
