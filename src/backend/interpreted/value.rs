//! Runtime values.
//!
//! Containers nest at most [`MAX_VALUE_DEPTH`] levels. Every constructor of a nested value
//! checks the bound, so cloning, dropping and JSON conversion recurse a bounded amount.

use super::parser::Expr;
use super::InterpretError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Deepest container nesting a program may build
pub const MAX_VALUE_DEPTH: usize = 256;

/// A user-defined function with the local bindings it closed over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Vec<Expr>,
    pub captured: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Lambda(Box<Closure>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Lambda(_) => "lambda",
        }
    }

    /// Nesting level: 0 for scalars, one more than the deepest element for containers
    pub fn depth(&self) -> usize {
        let deepest = match self {
            Value::List(items) => items.iter().map(Value::depth).max(),
            Value::Map(map) => map.values().map(Value::depth).max(),
            Value::Lambda(closure) => closure.captured.iter().map(|(_, v)| v.depth()).max(),
            _ => return 0,
        };
        1 + deepest.unwrap_or(0)
    }

    /// Reject a freshly built value nesting deeper than [`MAX_VALUE_DEPTH`]
    pub fn bounded(self) -> Result<Self, InterpretError> {
        if self.depth() > MAX_VALUE_DEPTH {
            Err(InterpretError::DepthExceeded(MAX_VALUE_DEPTH))
        } else {
            Ok(self)
        }
    }

    /// Only `nil` and `false` are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Convert to JSON. Bytes become arrays of numbers; lambdas have no JSON form.
    pub fn to_json(&self) -> Result<serde_json::Value, InterpretError> {
        Ok(match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::from(b.clone()),
            Value::List(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<_, InterpretError>>()?,
            ),
            Value::Lambda(_) => {
                return Err(InterpretError::Type("a lambda has no JSON form".into()))
            }
        })
    }

    /// Convert from JSON. Only integral numbers are accepted.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, InterpretError> {
        Self::from_json_at(json, 0)
    }

    fn from_json_at(json: &serde_json::Value, depth: usize) -> Result<Self, InterpretError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(InterpretError::DepthExceeded(MAX_VALUE_DEPTH));
        }
        Ok(match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Int(
                n.as_i64()
                    .ok_or_else(|| InterpretError::Type(format!("unsupported number {}", n)))?,
            ),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::List(
                items
                    .iter()
                    .map(|item| Value::from_json_at(item, depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), Value::from_json_at(v, depth + 1)?)))
                    .collect::<Result<_, InterpretError>>()?,
            ),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Value::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Lambda(closure) => write!(f, "<lambda/{}>", closure.params.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_conversion() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": [1, "x", null, true], "b": {}}"#).unwrap();
        let value = Value::from_json(&json).unwrap();
        assert_eq!(value.to_json().unwrap(), json);
        assert!(Value::from_json(&serde_json::json!(1.5)).is_err());
    }

    #[test]
    fn test_lambda_has_no_json() {
        let lambda = Value::Lambda(Box::new(Closure {
            params: vec!["x".into()],
            body: vec![Expr::Symbol("x".into())],
            captured: Vec::new(),
        }));
        assert!(lambda.to_json().is_err());
        assert_eq!(lambda.to_string(), "<lambda/1>");
    }

    #[test]
    fn test_display() {
        let value = Value::List(vec![Value::Int(1), Value::Bytes(vec![0xab]), Value::Nil]);
        assert_eq!(value.to_string(), "(1 0xab nil)");
    }

    #[test]
    fn test_depth_bound() {
        let mut value = Value::Int(1);
        for _ in 0..MAX_VALUE_DEPTH {
            value = Value::List(vec![value]).bounded().unwrap();
        }
        assert_eq!(value.depth(), MAX_VALUE_DEPTH);
        assert!(matches!(
            Value::List(vec![value]).bounded(),
            Err(InterpretError::DepthExceeded(MAX_VALUE_DEPTH))
        ));
    }

    #[test]
    fn test_deep_json_rejected() {
        let mut json = serde_json::json!(0);
        for _ in 0..MAX_VALUE_DEPTH + 1 {
            json = serde_json::Value::Array(vec![json]);
        }
        assert!(matches!(Value::from_json(&json), Err(InterpretError::DepthExceeded(_))));
    }
}
