// Attribute maps attached to documents and chunks
// Only primitive values and nested maps survive sanitization


use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// A sanitized attribute mapping, ordered by key for deterministic persistence
pub type Attributes = BTreeMap<String, AttributeValue>;

/// The closed set of attribute shapes that may be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Map(Attributes),
}

impl AttributeValue {
    /// Convert an arbitrary JSON value, returning `None` for shapes that are dropped
    #[inline]
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(b)),
            Value::Number(n) => Some(Self::Number(n)),
            Value::String(s) => Some(Self::String(s)),
            Value::Object(map) => Some(Self::Map(sanitize(map))),
            Value::Array(_) => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<bool> for AttributeValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Recursively drop every value that is not a string, number, boolean, null or nested map
#[inline]
pub fn sanitize(map: Map<String, Value>) -> Attributes {
    map.into_iter()
        .filter_map(|(key, value)| AttributeValue::from_json(value).map(|v| (key, v)))
        .collect()
}
