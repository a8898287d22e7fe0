use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::bytecode::FunctionId;

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorObject {
    /// `Error`, `TypeError`, `ReferenceError`, ...
    pub name: String,
    pub message: String,
}

/// A script value. Cheap to clone; strings and errors are shared.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Error(Arc<ErrorObject>),
    Function { id: FunctionId, name: Arc<str> },
}

impl Value {
    pub fn string(value: impl Into<Arc<str>>) -> Self {
        Value::String(value.into())
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Value::Error(Arc::new(ErrorObject {
            name: name.into(),
            message: message.into(),
        }))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(value) => *value,
            Value::Number(value) => *value != 0.0 && !value.is_nan(),
            Value::String(value) => !value.is_empty(),
            Value::Error(_) | Value::Function { .. } => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Error(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function { .. } => "function",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined | Value::Error(_) | Value::Function { .. } => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(value) => f64::from(u8::from(*value)),
            Value::Number(value) => *value,
            Value::String(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            (Value::Function { id: a, .. }, Value::Function { id: b, .. }) => a == b,
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    /// The JSON form sent to clients.
    pub fn to_grip(&self) -> serde_json::Value {
        match self {
            Value::Undefined => json!({"type": "undefined"}),
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => json!(value),
            Value::Number(value) => number_grip(*value),
            Value::String(value) => json!(&**value),
            Value::Error(error) => json!({
                "type": "object",
                "class": error.name,
                "message": error.message,
            }),
            Value::Function { name, .. } => json!({
                "type": "object",
                "class": "Function",
                "name": &**name,
            }),
        }
    }
}

fn number_grip(value: f64) -> serde_json::Value {
    if value.is_nan() {
        json!({"type": "NaN"})
    } else if value.is_infinite() {
        let kind = if value > 0.0 { "Infinity" } else { "-Infinity" };
        json!({ "type": kind })
    } else if value.fract() == 0.0 && value.abs() < 9.0e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_owned()
    } else if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Number(value) => f.write_str(&format_number(*value)),
            Value::String(value) => f.write_str(value),
            Value::Error(error) if error.message.is_empty() => f.write_str(&error.name),
            Value::Error(error) => write!(f, "{}: {}", error.name, error.message),
            Value::Function { name, .. } => write!(f, "function {name}() {{ ... }}"),
        }
    }
}
