use bytes::Bytes;

use crate::schema::{ScalarType, Shape};

/// Field value as seen by callers.
///
/// `Null` is a present-but-null value; "not present" (field of an unselected
/// choice variant) is `None` at the accessor level.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Bytes(Bytes),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn is_scalar_of(&self, ty: ScalarType) -> bool {
        matches!(
            (self, ty),
            (Value::Bool(_), ScalarType::Bool)
                | (Value::Int(_), ScalarType::Int)
                | (Value::Long(_), ScalarType::Long)
                | (Value::Double(_), ScalarType::Double)
                | (Value::Str(_), ScalarType::String)
                | (Value::Bytes(_), ScalarType::Bytes)
        )
    }

    /// Whether this value may be stored in a field of `shape`.
    pub(crate) fn fits(&self, shape: &Shape) -> bool {
        match (self, shape) {
            (Value::Null, Shape::Scalar(_) | Shape::List(_)) => true,
            (Value::List(items), Shape::List(ty)) => items.iter().all(|v| v.is_scalar_of(*ty)),
            (v, Shape::Scalar(ty)) => v.is_scalar_of(*ty),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
