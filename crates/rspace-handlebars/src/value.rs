/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template value type.
//!
//! [`TemplateValue`] is the closed set of values a template can see: the
//! implicit context, helper arguments, hash arguments and helper results all
//! share this representation. Truthiness and stringification follow the
//! Handlebars rules so templates authored for the browser engine render the
//! same way here.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};

/// A value that can be used in template evaluation.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(untagged)]
pub enum TemplateValue {
    /// A null/missing value.
    #[default]
    Null,

    /// A boolean value.
    Bool(bool),

    /// A numeric value.
    Number(f64),

    /// A string value.
    String(String),

    /// A list of values.
    List(Vec<TemplateValue>),

    /// An ordered map of string keys to values (a plain data record).
    Map(IndexMap<String, TemplateValue>),
}

impl TemplateValue {
    /// Check if this value is "truthy" for conditional evaluation.
    ///
    /// Falsy values are `false`, `null`, `0`, the empty string and the
    /// empty list. Every map is truthy, even an empty one.
    pub fn is_truthy(&self) -> bool {
        match self {
            TemplateValue::Null => false,
            TemplateValue::Bool(b) => *b,
            TemplateValue::Number(n) => *n != 0.0 && !n.is_nan(),
            TemplateValue::String(s) => !s.is_empty(),
            TemplateValue::List(items) => !items.is_empty(),
            TemplateValue::Map(_) => true,
        }
    }

    /// Whether the value has own enumerable keys.
    ///
    /// Non-empty strings, lists and maps do; numbers, booleans and null never do.
    pub fn has_own_keys(&self) -> bool {
        match self {
            TemplateValue::String(s) => !s.is_empty(),
            TemplateValue::List(items) => !items.is_empty(),
            TemplateValue::Map(m) => !m.is_empty(),
            TemplateValue::Null | TemplateValue::Bool(_) | TemplateValue::Number(_) => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TemplateValue::Null)
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, TemplateValue>> {
        match self {
            TemplateValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TemplateValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TemplateValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Look up a single property.
    ///
    /// Maps are indexed by key, lists by numeric index.
    pub fn get(&self, key: &str) -> Option<&TemplateValue> {
        match self {
            TemplateValue::Map(m) => m.get(key),
            TemplateValue::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Get a nested field by path.
    ///
    /// For example, `get_path(&["employee", "salary"])` on a Map containing
    /// `{"employee": {"salary": 50000}}` returns the salary value.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&TemplateValue> {
        let mut current = self;
        for part in path {
            current = current.get(part.as_ref())?;
        }
        Some(current)
    }

    /// Render this value as a string for output.
    ///
    /// - Null: ""
    /// - Bool: "true" / "false"
    /// - Number: integral values without a fractional part
    /// - String: returned as-is
    /// - List: elements joined with ","
    /// - Map: "[object Object]"
    pub fn render(&self) -> String {
        match self {
            TemplateValue::Null => String::new(),
            TemplateValue::Bool(b) => b.to_string(),
            TemplateValue::Number(n) => format_number(*n),
            TemplateValue::String(s) => s.clone(),
            TemplateValue::List(items) => items
                .iter()
                .map(|v| v.render())
                .collect::<Vec<_>>()
                .join(","),
            TemplateValue::Map(_) => "[object Object]".to_string(),
        }
    }
}

/// Integral numbers serialize as integers, so JSON that passes through a
/// `TemplateValue` keeps `1` rather than `1.0`.
impl Serialize for TemplateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TemplateValue::Null => serializer.serialize_unit(),
            TemplateValue::Bool(b) => serializer.serialize_bool(*b),
            TemplateValue::Number(n) => match as_integer(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
            TemplateValue::String(s) => serializer.serialize_str(s),
            TemplateValue::List(items) => serializer.collect_seq(items),
            TemplateValue::Map(map) => serializer.collect_map(map),
        }
    }
}

fn as_integer(n: f64) -> Option<i64> {
    // fract() is NaN for infinities
    (n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64).then_some(n as i64)
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl From<serde_json::Value> for TemplateValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TemplateValue::Null,
            serde_json::Value::Bool(b) => TemplateValue::Bool(b),
            serde_json::Value::Number(n) => TemplateValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => TemplateValue::String(s),
            serde_json::Value::Array(items) => {
                TemplateValue::List(items.into_iter().map(TemplateValue::from).collect())
            }
            serde_json::Value::Object(map) => TemplateValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, TemplateValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::String(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::String(value)
    }
}

impl From<bool> for TemplateValue {
    fn from(value: bool) -> Self {
        TemplateValue::Bool(value)
    }
}

impl From<f64> for TemplateValue {
    fn from(value: f64) -> Self {
        TemplateValue::Number(value)
    }
}

impl From<i64> for TemplateValue {
    fn from(value: i64) -> Self {
        TemplateValue::Number(value as f64)
    }
}

impl From<usize> for TemplateValue {
    fn from(value: usize) -> Self {
        TemplateValue::Number(value as f64)
    }
}

impl From<Vec<TemplateValue>> for TemplateValue {
    fn from(value: Vec<TemplateValue>) -> Self {
        TemplateValue::List(value)
    }
}

impl From<IndexMap<String, TemplateValue>> for TemplateValue {
    fn from(value: IndexMap<String, TemplateValue>) -> Self {
        TemplateValue::Map(value)
    }
}
