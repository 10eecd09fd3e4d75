use crate::ActivityError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Dynamic value type for parameters, variables, memory and port data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Json(j) => j.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Json(j) => j.as_bool(),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Json(serde_json::Value::Null))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Json(_) => ValueKind::Json,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Convert plain JSON into native values, keeping scalars unwrapped.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }

    /// Plain JSON view of the value, without the enum tagging.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                serde_json::Value::Array(b.iter().map(|byte| (*byte).into()).collect())
            }
            Value::Json(j) => j.clone(),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Walk a dotted path (`user.address.0.city`) through objects and arrays.
    pub fn lookup(&self, path: &[&str]) -> Option<Value> {
        let Some((head, rest)) = path.split_first() else {
            return Some(self.clone());
        };
        let child = match self {
            Value::Object(map) => map.get(*head).cloned(),
            Value::Array(items) => head.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            Value::Json(serde_json::Value::Object(obj)) => obj.get(*head).cloned().map(Value::from_json),
            Value::Json(serde_json::Value::Array(items)) => head
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .map(Value::from_json),
            _ => None,
        }?;
        child.lookup(rest)
    }

    /// Textual form used when a value is spliced into a template.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Json(serde_json::Value::String(s)) => s.clone(),
            Value::Json(serde_json::Value::Null) => String::new(),
            Value::Json(j) => j.to_string(),
            Value::Array(_) | Value::Object(_) => self.to_json().to_string(),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

/// Declared type of a parameter or port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Any,
    Null,
    Bool,
    Number,
    String,
    Bytes,
    Json,
    Array,
    Object,
}

impl ValueKind {
    /// Whether data of this kind may flow through a slot declared as `self`.
    /// Null is accepted everywhere so that ports can fire without a payload.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueKind::Any, _) | (_, Value::Null) => true,
            (ValueKind::Json, Value::Array(_) | Value::Object(_)) => true,
            (kind, value) => *kind == value.kind(),
        }
    }

    /// Convert resolved template text into a value of this kind.
    pub fn convert(&self, text: &str) -> Result<Value, ActivityError> {
        let invalid = || ActivityError::Value(format!("'{}' is not a valid {}", text, self));
        match self {
            ValueKind::Any => Ok(serde_json::from_str::<serde_json::Value>(text)
                .map(Value::from_json)
                .unwrap_or_else(|_| Value::String(text.to_string()))),
            ValueKind::Null => Ok(Value::Null),
            ValueKind::String => Ok(Value::String(text.to_string())),
            ValueKind::Bytes => Ok(Value::Bytes(text.as_bytes().to_vec())),
            ValueKind::Number => text.trim().parse::<f64>().map(Value::Number).map_err(|_| invalid()),
            ValueKind::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            ValueKind::Json => serde_json::from_str(text).map(Value::Json).map_err(|_| invalid()),
            ValueKind::Array => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(json @ serde_json::Value::Array(_)) => Ok(Value::from_json(json)),
                _ => Err(invalid()),
            },
            ValueKind::Object => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(json @ serde_json::Value::Object(_)) => Ok(Value::from_json(json)),
                _ => Err(invalid()),
            },
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Any => "any",
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Json => "json",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Type-tagged value kept in serialized form and materialized on first access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueObject {
    kind: ValueKind,
    serialized: String,
    #[serde(skip)]
    cache: OnceCell<Value>,
}

impl ValueObject {
    pub fn new(value: Value) -> Self {
        let serialized = serde_json::to_string(&value).unwrap_or_default();
        Self {
            kind: value.kind(),
            serialized,
            cache: OnceCell::with_value(value),
        }
    }

    /// Rehydrate from persisted parts. Nothing is parsed until `get`.
    pub fn from_parts(kind: ValueKind, serialized: impl Into<String>) -> Self {
        Self {
            kind,
            serialized: serialized.into(),
            cache: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn serialized(&self) -> &str {
        &self.serialized
    }

    pub fn is_materialized(&self) -> bool {
        self.cache.get().is_some()
    }

    pub fn get(&self) -> Result<&Value, ActivityError> {
        self.cache.get_or_try_init(|| {
            let value: Value = serde_json::from_str(&self.serialized)
                .map_err(|e| ActivityError::Value(format!("cannot materialize {}: {}", self.kind, e)))?;
            if self.kind != ValueKind::Any && value.kind() != self.kind {
                return Err(ActivityError::Value(format!(
                    "stored value is {} but tagged {}",
                    value.kind(),
                    self.kind
                )));
            }
            Ok(value)
        })
    }
}

impl PartialEq for ValueObject {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.serialized == other.serialized
    }
}

impl From<Value> for ValueObject {
    fn from(value: Value) -> Self {
        ValueObject::new(value)
    }
}

/// Named collection of value objects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueStore {
    values: HashMap<String, ValueObject>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), ValueObject::new(value));
    }

    pub fn get(&self, key: &str) -> Option<&ValueObject> {
        self.values.get(key)
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.values.get(key).and_then(|v| v.get().ok().cloned())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ValueObject)> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_object_materializes_lazily() {
        let original = ValueObject::new(Value::Number(42.0));
        let restored = ValueObject::from_parts(original.kind(), original.serialized());

        assert!(!restored.is_materialized());
        assert_eq!(restored.get().unwrap(), &Value::Number(42.0));
        assert!(restored.is_materialized());
    }

    #[test]
    fn value_object_rejects_mismatched_tag() {
        let restored = ValueObject::from_parts(ValueKind::Bool, r#"{"type":"Number","value":1.0}"#);
        assert!(restored.get().is_err());
    }

    #[test]
    fn render_keeps_integers_plain() {
        assert_eq!(Value::Number(123.0).render(), "123");
        assert_eq!(Value::Number(1.5).render(), "1.5");
        assert_eq!(Value::Null.render(), "");
    }

    #[test]
    fn lookup_walks_nested_json() {
        let value = Value::Json(serde_json::json!({"user": {"tags": ["a", "b"]}}));
        assert_eq!(value.lookup(&["user", "tags", "1"]), Some(Value::String("b".into())));
        assert_eq!(value.lookup(&["user", "missing"]), None);
    }

    #[test]
    fn convert_text_by_kind() {
        assert_eq!(ValueKind::Number.convert("5").unwrap(), Value::Number(5.0));
        assert_eq!(ValueKind::Bool.convert("yes").unwrap(), Value::Bool(true));
        assert!(ValueKind::Number.convert("five").is_err());
        assert_eq!(ValueKind::Any.convert("hello").unwrap(), Value::String("hello".into()));
    }
}
