//! Tagged cell values.
//!
//! A [`Value`] carries a type tag plus payload. It is checked against the
//! column's [`DataType`] at every encode boundary (predicates, bounds, batch
//! encoding) with [`Value::coerce_to`].

use std::cmp::Ordering;
use std::fmt;

use crate::types::DataType;

/// A single cell value. `Null` is the explicit null sentinel; it never equals
/// or orders against a non-null value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Binary(Vec<u8>),
    UnixtimeMicros(i64),
    /// Unscaled decimal value; the scale comes from the column type.
    Decimal(i128),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's runtime type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::UnixtimeMicros(_) => "unixtime_micros",
            Value::Decimal(_) => "decimal",
        }
    }

    /// Whether this value is already exactly of type `ty`.
    pub fn matches_type(&self, ty: DataType) -> bool {
        matches!(
            (self, ty),
            (Value::Int8(_), DataType::Int8)
                | (Value::Int16(_), DataType::Int16)
                | (Value::Int32(_), DataType::Int32)
                | (Value::Int64(_), DataType::Int64)
                | (Value::Float(_), DataType::Float)
                | (Value::Double(_), DataType::Double)
                | (Value::Bool(_), DataType::Bool)
                | (Value::String(_), DataType::String)
                | (Value::Binary(_), DataType::Binary)
                | (Value::UnixtimeMicros(_), DataType::UnixtimeMicros)
                | (Value::Decimal(_), DataType::Decimal { .. })
        )
    }

    /// Convert to a value of type `ty` if the conversion is lossless.
    ///
    /// Integers convert between widths when the value fits, `Float` widens to
    /// `Double`, decimals must fit the column's precision. Everything else
    /// (including `Null`) returns `None`.
    pub fn coerce_to(&self, ty: DataType) -> Option<Value> {
        if let (Value::Decimal(v), DataType::Decimal { precision, .. }) = (self, ty) {
            return decimal_fits(*v, precision).then_some(Value::Decimal(*v));
        }
        if self.matches_type(ty) {
            return Some(self.clone());
        }
        if let Some(i) = self.as_plain_integer() {
            return match ty {
                DataType::Int8 => i8::try_from(i).ok().map(Value::Int8),
                DataType::Int16 => i16::try_from(i).ok().map(Value::Int16),
                DataType::Int32 => i32::try_from(i).ok().map(Value::Int32),
                DataType::Int64 => Some(Value::Int64(i)),
                _ => None,
            };
        }
        match (self, ty) {
            (Value::Float(f), DataType::Double) => Some(Value::Double(f64::from(*f))),
            _ => None,
        }
    }

    /// The value as an `i64` if it is one of the plain integer variants.
    /// Timestamps are deliberately excluded.
    fn as_plain_integer(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Compare two values of the same variant. Returns `None` for mismatched
    /// variants, nulls, and NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int8(a), Value::Int8(b)) => Some(a.cmp(b)),
            (Value::Int16(a), Value::Int16(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::UnixtimeMicros(a), Value::UnixtimeMicros(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Whether the value is a floating point NaN.
    pub fn is_nan(&self) -> bool {
        match self {
            Value::Float(f) => f.is_nan(),
            Value::Double(d) => d.is_nan(),
            _ => false,
        }
    }
}

/// Whether an unscaled decimal fits in `precision` digits.
pub(crate) fn decimal_fits(unscaled: i128, precision: u8) -> bool {
    let max = 10i128.checked_pow(u32::from(precision)).unwrap_or(i128::MAX);
    unscaled.unsigned_abs() < max.unsigned_abs()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Binary(v) => write!(f, "{v:?}"),
            Value::UnixtimeMicros(v) => write!(f, "{v}us"),
            Value::Decimal(v) => write!(f, "{v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
