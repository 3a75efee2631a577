//! Values that cross the script/host boundary.
//!
//! Everything here is plain owned data: a [`ResultValue`] or an [`ArgMap`] is
//! always a deep copy and never refers into state owned by either thread.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scalar call argument or configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl ArgValue {
    /// Converts a JSON value, dropping anything that is not a scalar.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(ArgValue::Null),
            serde_json::Value::Bool(b) => Some(ArgValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(ArgValue::Int)
                .or_else(|| n.as_f64().map(ArgValue::Double)),
            serde_json::Value::String(s) => Some(ArgValue::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

/// Key-ordered map of scalar arguments.
///
/// Used both for call arguments and for binding construction config. The typed
/// getters implement the "documented default" rule: a missing key or a value
/// of the wrong type yields the caller's default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgMap(BTreeMap<String, ArgValue>);

/// Binding construction config uses the same shape as call arguments.
pub type ConfigMap = ArgMap;

impl ArgMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ArgValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_str_or(&self, key: &str, default: &str) -> String {
        match self.0.get(key) {
            Some(ArgValue::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(ArgValue::Int(i)) => *i,
            _ => default,
        }
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(ArgValue::Bool(b)) => *b,
            _ => default,
        }
    }

    /// Parses a JSON object leniently.
    ///
    /// Non-scalar members are dropped and anything other than an object yields
    /// an empty map, so malformed arguments degrade to per-key defaults.
    pub fn from_json_str(text: &str) -> Self {
        let parsed: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(target: "exo::dispatch", error = %err, "ignoring malformed arguments");
                return Self::default();
            }
        };

        let mut map = Self::default();
        if let serde_json::Value::Object(members) = parsed {
            for (key, value) in &members {
                match ArgValue::from_json(value) {
                    Some(arg) => map.insert(key.clone(), arg),
                    None => {
                        tracing::debug!(target: "exo::dispatch", key = %key, "dropping non-scalar argument")
                    }
                }
            }
        }
        map
    }
}

impl FromIterator<(String, ArgValue)> for ArgMap {
    fn from_iter<I: IntoIterator<Item = (String, ArgValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Double(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::String(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::String(value)
    }
}

/// The result of a call, as delivered to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<ResultValue>),
    Map(BTreeMap<String, ResultValue>),
}

impl ResultValue {
    /// Builds a map result from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<ResultValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        ResultValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ResultValue::Null)
    }

    pub fn get(&self, key: &str) -> Option<&ResultValue> {
        match self {
            ResultValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ResultValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ResultValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResultValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<ArgValue> for ResultValue {
    fn from(value: ArgValue) -> Self {
        match value {
            ArgValue::Null => ResultValue::Null,
            ArgValue::Bool(b) => ResultValue::Bool(b),
            ArgValue::Int(i) => ResultValue::Int(i),
            ArgValue::Double(d) => ResultValue::Double(d),
            ArgValue::String(s) => ResultValue::String(s),
        }
    }
}

impl From<bool> for ResultValue {
    fn from(value: bool) -> Self {
        ResultValue::Bool(value)
    }
}

impl From<i64> for ResultValue {
    fn from(value: i64) -> Self {
        ResultValue::Int(value)
    }
}

impl From<i32> for ResultValue {
    fn from(value: i32) -> Self {
        ResultValue::Int(i64::from(value))
    }
}

impl From<u32> for ResultValue {
    fn from(value: u32) -> Self {
        ResultValue::Int(i64::from(value))
    }
}

impl From<f64> for ResultValue {
    fn from(value: f64) -> Self {
        ResultValue::Double(value)
    }
}

impl From<&str> for ResultValue {
    fn from(value: &str) -> Self {
        ResultValue::String(value.to_string())
    }
}

impl From<String> for ResultValue {
    fn from(value: String) -> Self {
        ResultValue::String(value)
    }
}

impl From<Vec<ResultValue>> for ResultValue {
    fn from(value: Vec<ResultValue>) -> Self {
        ResultValue::List(value)
    }
}
