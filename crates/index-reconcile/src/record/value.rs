//! Canonical value model shared by database rows and index documents.
//!
//! Both stores are decoded into [`Value`] so that the structural diff can
//! compare them without caring where a value came from. Numbers are
//! canonicalized on construction: integral floats collapse to `Int` so that a
//! `12.0` from one side equals a `12` from the other.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Largest integer an f64 represents exactly.
const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a numeric value, collapsing integral floats to `Int`.
    pub fn number(f: f64) -> Self {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < MAX_EXACT_F64_INT {
            Value::Int(f as i64)
        } else {
            Value::Float(f)
        }
    }

    /// An empty map.
    pub fn empty_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used for lag timestamps.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Byte(b) => Some(*b as f64),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Render as compact JSON.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("<unserializable>"))
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::number(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Byte(b) => serializer.serialize_u8(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            Value::Timestamp(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "<nil>"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Timestamp(ts) => {
                write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.to_json_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integral_floats_collapse() {
        assert_eq!(Value::number(12.0), Value::Int(12));
        assert_eq!(Value::number(12.5), Value::Float(12.5));
        assert_eq!(Value::from(json!(12.0)), Value::Int(12));
    }

    #[test]
    fn test_from_json_nested() {
        let v = Value::from(json!({"a": [1, "x", null], "b": {"c": true}}));
        let a = v.get("a").unwrap();
        assert_eq!(
            a,
            &Value::List(vec![Value::Int(1), Value::Text("x".into()), Value::Null])
        );
        assert_eq!(v.get("b").and_then(|b| b.get("c")), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Text("A".into()).to_string(), "A");
        assert_eq!(Value::Null.to_string(), "<nil>");
        assert_eq!(Value::from(json!({"k": 1})).to_string(), r#"{"k":1}"#);
        let ts = DateTime::parse_from_rfc3339("2023-01-02T03:04:05.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            Value::Timestamp(ts).to_string(),
            "2023-01-02T03:04:05.123456789Z"
        );
    }

    #[test]
    fn test_serialize_roundtrips_through_json() {
        let original = json!({"host": {"id": "1", "facts": {"n": 2}, "tags": []}});
        let value = Value::from(original.clone());
        assert_eq!(serde_json::to_value(&value).unwrap(), original);
    }
}
