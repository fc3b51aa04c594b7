//! Structured Value: the single interchange type for json, xml and form payloads.
//!
//! # Design Decisions
//! - Closed sum type; no runtime reflection
//! - Maps are `BTreeMap` so serialization is deterministic and equality ignores insertion order
//! - Integers and floats stay distinct so json/xml round trips are exact

mod serde_impl;

use std::collections::BTreeMap;

/// A dynamically typed value tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map from key/value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a list from values.
    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Member lookup on maps; `None` for every other variant.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Insert a member, turning `Null` into an empty map first.
    ///
    /// Returns `false` (and does nothing) when `self` is a non-map scalar or list.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> bool {
        if self.is_null() {
            *self = Value::Map(BTreeMap::new());
        }
        match self {
            Value::Map(map) => {
                map.insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Text form of a scalar, as used for header fields and form values.
    ///
    /// Lists and maps have no scalar text form.
    pub fn to_scalar_string(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::List(_) | Value::Map(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "array",
            Value::Map(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality_ignores_insertion_order() {
        let a = Value::map([("x", Value::from(1)), ("y", Value::from("two"))]);
        let b = Value::map([("y", Value::from("two")), ("x", Value::from(1))]);
        assert_eq!(a, b);
        assert_ne!(a, Value::map([("x", Value::from(1.0))]));
    }

    #[test]
    fn insert_promotes_null_to_map() {
        let mut v = Value::Null;
        assert!(v.insert("k", Value::from(true)));
        assert_eq!(v.get("k").and_then(Value::as_bool), Some(true));

        let mut s = Value::from("scalar");
        assert!(!s.insert("k", Value::Null));
    }

    #[test]
    fn scalar_strings() {
        assert_eq!(Value::from(42).to_scalar_string().as_deref(), Some("42"));
        assert_eq!(Value::from(1.5).to_scalar_string().as_deref(), Some("1.5"));
        assert_eq!(Value::list([]).to_scalar_string(), None);
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::from(3).as_f64(), Some(3.0));
        assert_eq!(Value::from(3.5).as_i64(), None);
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
