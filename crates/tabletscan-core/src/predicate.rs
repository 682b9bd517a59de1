//! Column predicates pushed down to tablet servers.
//!
//! User-level comparisons (`EQ`, `LT`, `LE`, `GT`, `GE`, `IN_LIST`, `IS NULL`,
//! `IS NOT NULL`) are type-checked against the column when they are built and
//! normalized into a [`PredicateKind`]: ranges are always
//! `[inclusive lower, exclusive upper)`, IN-lists are sorted and deduplicated,
//! and degenerate shapes collapse (`5 <= x < 6` becomes `x = 5`, an empty
//! range becomes `None`). Predicates on the same column intersect.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding::{decode_cell, encode_cell};
use crate::error::{DecodeError, Error, PredicateError};
use crate::schema::{ColumnSchema, Schema};
use crate::types::DataType;
use crate::value::{Value, decimal_fits};

/// User-facing comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    InList,
    IsNotNull,
    IsNull,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::InList => "IN",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::IsNull => "IS NULL",
        })
    }
}

/// The right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand (`IS NULL`, `IS NOT NULL`).
    None,
    Value(Value),
    List(Vec<Value>),
}

/// Reference to a column by name or by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRef<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for ColumnRef<'a> {
    fn from(name: &'a str) -> Self {
        ColumnRef::Name(name)
    }
}

impl From<usize> for ColumnRef<'_> {
    fn from(index: usize) -> Self {
        ColumnRef::Index(index)
    }
}

/// Normalized predicate shape.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateKind {
    /// Matches nothing.
    None,
    Equality(Value),
    /// `lower <= v < upper`; at least one side is set.
    Range {
        lower: Option<Value>,
        upper: Option<Value>,
    },
    /// Sorted, deduplicated, at least two values.
    InList(Vec<Value>),
    IsNotNull,
    IsNull,
}

/// A type-checked, normalized predicate on one column of a table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPredicate {
    column_index: usize,
    column: ColumnSchema,
    kind: PredicateKind,
}

/// Build a predicate `column <op> operand` against `schema`.
///
/// Fails with `TypeMismatch` if any operand value is not losslessly
/// convertible to the column type (IN-lists are all-or-nothing),
/// `NullOperand` when comparing against null, and `UnsupportedOperator` when
/// the operand shape does not fit the operator.
pub fn encode_predicate<'a>(
    schema: &Schema,
    column: impl Into<ColumnRef<'a>>,
    op: Operator,
    operand: Operand,
) -> Result<ColumnPredicate, PredicateError> {
    let column_index = match column.into() {
        ColumnRef::Name(name) => schema
            .find_column(name)
            .ok_or_else(|| PredicateError::UnknownColumn(name.to_string()))?,
        ColumnRef::Index(index) => {
            if index >= schema.column_count() {
                return Err(PredicateError::UnknownColumn(format!("#{index}")));
            }
            index
        }
    };
    let column = schema.columns()[column_index].clone();
    let unsupported = |reason: &str| PredicateError::UnsupportedOperator {
        column: column.name.clone(),
        op: op.to_string(),
        reason: reason.to_string(),
    };

    let kind = match op {
        Operator::Eq | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            let value = match operand {
                Operand::Value(v) => check_operand(&column, v)?,
                Operand::None => return Err(PredicateError::NullOperand(column.name.clone())),
                Operand::List(_) => return Err(unsupported("expected a single value")),
            };
            comparison_kind(&column, op, value)
        }
        Operator::InList => {
            let values = match operand {
                Operand::List(values) => values,
                _ => return Err(unsupported("expected a list of values")),
            };
            let mut checked = values
                .into_iter()
                .map(|v| check_operand(&column, v))
                .collect::<Result<Vec<_>, _>>()?;
            checked.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
            checked.dedup();
            PredicateKind::InList(checked)
        }
        Operator::IsNotNull | Operator::IsNull => {
            if operand != Operand::None {
                return Err(unsupported("takes no operand"));
            }
            if op == Operator::IsNotNull {
                PredicateKind::IsNotNull
            } else if column.nullable {
                PredicateKind::IsNull
            } else {
                PredicateKind::None
            }
        }
    };

    let mut pred = ColumnPredicate {
        column_index,
        column,
        kind,
    };
    pred.simplify();
    Ok(pred)
}

/// Type-check one operand value against the column.
fn check_operand(column: &ColumnSchema, value: Value) -> Result<Value, PredicateError> {
    if value.is_null() {
        return Err(PredicateError::NullOperand(column.name.clone()));
    }
    if value.is_nan() {
        return Err(PredicateError::InvalidArgument(format!(
            "NaN is not a valid operand for column '{}'",
            column.name
        )));
    }
    value
        .coerce_to(column.data_type)
        .ok_or_else(|| PredicateError::TypeMismatch {
            column: column.name.clone(),
            expected: column.data_type,
            actual: value.type_name().to_string(),
        })
}

fn comparison_kind(column: &ColumnSchema, op: Operator, value: Value) -> PredicateKind {
    match op {
        Operator::Eq => PredicateKind::Equality(value),
        Operator::Lt => PredicateKind::Range {
            lower: None,
            upper: Some(value),
        },
        Operator::Ge => PredicateKind::Range {
            lower: Some(value),
            upper: None,
        },
        // `x <= max` holds for every non-null value.
        Operator::Le => match increment(column.data_type, &value) {
            Some(upper) => PredicateKind::Range {
                lower: None,
                upper: Some(upper),
            },
            None => PredicateKind::IsNotNull,
        },
        // `x > max` holds for nothing.
        Operator::Gt => match increment(column.data_type, &value) {
            Some(lower) => PredicateKind::Range {
                lower: Some(lower),
                upper: None,
            },
            None => PredicateKind::None,
        },
        Operator::InList | Operator::IsNotNull | Operator::IsNull => PredicateKind::IsNotNull,
    }
}

/// The smallest value of type `ty` greater than `value`, if any.
pub(crate) fn increment(ty: DataType, value: &Value) -> Option<Value> {
    match value {
        Value::Int8(v) => v.checked_add(1).map(Value::Int8),
        Value::Int16(v) => v.checked_add(1).map(Value::Int16),
        Value::Int32(v) => v.checked_add(1).map(Value::Int32),
        Value::Int64(v) => v.checked_add(1).map(Value::Int64),
        Value::UnixtimeMicros(v) => v.checked_add(1).map(Value::UnixtimeMicros),
        Value::Decimal(v) => {
            let next = v.checked_add(1)?;
            match ty {
                DataType::Decimal { precision, .. } if !decimal_fits(next, precision) => None,
                _ => Some(Value::Decimal(next)),
            }
        }
        Value::Bool(false) => Some(Value::Bool(true)),
        Value::Bool(true) => None,
        Value::Float(f) => next_up_f32(*f).map(Value::Float),
        Value::Double(d) => next_up_f64(*d).map(Value::Double),
        Value::String(s) => {
            let mut next = s.clone();
            next.push('\0');
            Some(Value::String(next))
        }
        Value::Binary(b) => {
            let mut next = b.clone();
            next.push(0);
            Some(Value::Binary(next))
        }
        Value::Null => None,
    }
}

fn next_up_f64(x: f64) -> Option<f64> {
    if x.is_nan() || x == f64::INFINITY {
        return None;
    }
    if x == 0.0 {
        return Some(f64::from_bits(1));
    }
    let bits = x.to_bits();
    Some(f64::from_bits(if x > 0.0 { bits + 1 } else { bits - 1 }))
}

fn next_up_f32(x: f32) -> Option<f32> {
    if x.is_nan() || x == f32::INFINITY {
        return None;
    }
    if x == 0.0 {
        return Some(f32::from_bits(1));
    }
    let bits = x.to_bits();
    Some(f32::from_bits(if x > 0.0 { bits + 1 } else { bits - 1 }))
}

fn cmp(a: &Value, b: &Value) -> Ordering {
    a.compare(b).unwrap_or(Ordering::Equal)
}

impl ColumnPredicate {
    pub fn column_index(&self) -> usize {
        self.column_index
    }

    pub fn column(&self) -> &ColumnSchema {
        &self.column
    }

    pub fn kind(&self) -> &PredicateKind {
        &self.kind
    }

    /// Whether the predicate can match no rows at all.
    pub fn is_none(&self) -> bool {
        self.kind == PredicateKind::None
    }

    fn simplify(&mut self) {
        let ty = self.column.data_type;
        let next = match &self.kind {
            PredicateKind::Range {
                lower: None,
                upper: None,
            } => Some(PredicateKind::IsNotNull),
            PredicateKind::Range {
                lower: Some(lower),
                upper: Some(upper),
            } => {
                if cmp(lower, upper) != Ordering::Less {
                    Some(PredicateKind::None)
                } else if increment(ty, lower).as_ref() == Some(upper) {
                    Some(PredicateKind::Equality(lower.clone()))
                } else {
                    None
                }
            }
            PredicateKind::InList(values) => match values.len() {
                0 => Some(PredicateKind::None),
                1 => Some(PredicateKind::Equality(values[0].clone())),
                _ => None,
            },
            _ => None,
        };
        if let Some(kind) = next {
            self.kind = kind;
        }
    }

    /// Intersect `other` (a predicate on the same column) into `self`.
    pub(crate) fn merge(&mut self, other: &ColumnPredicate) {
        debug_assert_eq!(self.column_index, other.column_index);
        use PredicateKind as K;

        let merged = match (&self.kind, &other.kind) {
            (K::None, _) | (_, K::None) => K::None,
            (K::IsNull, K::IsNull) => K::IsNull,
            (K::IsNull, _) | (_, K::IsNull) => K::None,
            (K::IsNotNull, k) | (k, K::IsNotNull) => k.clone(),
            (K::Equality(v), k) | (k, K::Equality(v)) => {
                if kind_matches(k, v) {
                    K::Equality(v.clone())
                } else {
                    K::None
                }
            }
            (K::InList(values), k) | (k, K::InList(values)) => K::InList(
                values
                    .iter()
                    .filter(|v| kind_matches(k, v))
                    .cloned()
                    .collect(),
            ),
            (
                K::Range {
                    lower: l1,
                    upper: u1,
                },
                K::Range {
                    lower: l2,
                    upper: u2,
                },
            ) => K::Range {
                lower: pick(l1, l2, Ordering::Greater),
                upper: pick(u1, u2, Ordering::Less),
            },
        };
        self.kind = merged;
        self.simplify();
    }

    /// Evaluate the predicate against one cell.
    pub fn evaluate(&self, value: &Value) -> bool {
        kind_matches(&self.kind, value)
    }

    /// The wire form sent to tablet servers.
    pub fn to_encoded(&self) -> EncodedPredicate {
        let mut enc = EncodedPredicate {
            column: self.column_index,
            code: 0,
            lower: None,
            upper: None,
            values: Vec::new(),
        };
        match &self.kind {
            PredicateKind::None => enc.code = CODE_NONE,
            PredicateKind::Equality(v) => {
                enc.code = CODE_EQUALITY;
                enc.values.push(encode_cell(v));
            }
            PredicateKind::Range { lower, upper } => {
                enc.code = CODE_RANGE;
                enc.lower = lower.as_ref().map(encode_cell);
                enc.upper = upper.as_ref().map(encode_cell);
            }
            PredicateKind::InList(values) => {
                enc.code = CODE_IN_LIST;
                enc.values = values.iter().map(encode_cell).collect();
            }
            PredicateKind::IsNotNull => enc.code = CODE_IS_NOT_NULL,
            PredicateKind::IsNull => enc.code = CODE_IS_NULL,
        }
        enc
    }

    /// Rebuild a predicate from its wire form, validating it against `schema`.
    pub fn from_encoded(schema: &Schema, enc: &EncodedPredicate) -> Result<Self, Error> {
        let column = schema
            .column(enc.column)
            .ok_or_else(|| PredicateError::UnknownColumn(format!("#{}", enc.column)))?
            .clone();
        let decode = |bytes: &Vec<u8>| -> Result<Value, Error> {
            let value = decode_cell(column.data_type, bytes)?;
            Ok(check_operand(&column, value)?)
        };

        let kind = match enc.code {
            CODE_NONE => PredicateKind::None,
            CODE_EQUALITY => match enc.values.as_slice() {
                [v] => PredicateKind::Equality(decode(v)?),
                _ => return Err(malformed(&column, "equality takes one value")),
            },
            CODE_RANGE => {
                if enc.lower.is_none() && enc.upper.is_none() {
                    return Err(malformed(&column, "range without bounds"));
                }
                PredicateKind::Range {
                    lower: enc.lower.as_ref().map(decode).transpose()?,
                    upper: enc.upper.as_ref().map(decode).transpose()?,
                }
            }
            CODE_IN_LIST => {
                let mut values = enc.values.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
                values.sort_by(cmp);
                values.dedup();
                PredicateKind::InList(values)
            }
            CODE_IS_NOT_NULL => PredicateKind::IsNotNull,
            CODE_IS_NULL if column.nullable => PredicateKind::IsNull,
            CODE_IS_NULL => PredicateKind::None,
            other => return Err(DecodeError::UnknownPredicateCode(other).into()),
        };
        let mut pred = ColumnPredicate {
            column_index: enc.column,
            column,
            kind,
        };
        pred.simplify();
        Ok(pred)
    }
}

fn malformed(column: &ColumnSchema, reason: &str) -> Error {
    PredicateError::InvalidArgument(format!("column '{}': {reason}", column.name)).into()
}

/// Pick the tighter of two optional bounds: the one ordering as `prefer`
/// relative to the other.
fn pick(a: &Option<Value>, b: &Option<Value>, prefer: Ordering) -> Option<Value> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if cmp(x, y) == prefer { x } else { y }.clone()),
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (None, None) => None,
    }
}

fn kind_matches(kind: &PredicateKind, value: &Value) -> bool {
    if value.is_null() {
        return matches!(kind, PredicateKind::IsNull);
    }
    match kind {
        PredicateKind::None | PredicateKind::IsNull => false,
        PredicateKind::IsNotNull => true,
        PredicateKind::Equality(v) => value.compare(v) == Some(Ordering::Equal),
        PredicateKind::Range { lower, upper } => {
            let above = lower
                .as_ref()
                .is_none_or(|l| matches!(value.compare(l), Some(Ordering::Greater | Ordering::Equal)));
            let below = upper
                .as_ref()
                .is_none_or(|u| value.compare(u) == Some(Ordering::Less));
            above && below
        }
        PredicateKind::InList(values) => values
            .binary_search_by(|candidate| cmp(candidate, value))
            .is_ok(),
    }
}

impl fmt::Display for ColumnPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.column.name;
        match &self.kind {
            PredicateKind::None => write!(f, "`{name}` NONE"),
            PredicateKind::Equality(v) => write!(f, "`{name}` = {v}"),
            PredicateKind::Range { lower, upper } => match (lower, upper) {
                (Some(l), Some(u)) => write!(f, "`{name}` >= {l} AND `{name}` < {u}"),
                (Some(l), None) => write!(f, "`{name}` >= {l}"),
                (None, Some(u)) => write!(f, "`{name}` < {u}"),
                (None, None) => write!(f, "`{name}` IS NOT NULL"),
            },
            PredicateKind::InList(values) => {
                let list: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "`{name}` IN ({})", list.join(", "))
            }
            PredicateKind::IsNotNull => write!(f, "`{name}` IS NOT NULL"),
            PredicateKind::IsNull => write!(f, "`{name}` IS NULL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Predicate sets
// ---------------------------------------------------------------------------

/// The conjunction of all predicates on a scan, at most one (merged)
/// predicate per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateSet {
    by_column: BTreeMap<usize, ColumnPredicate>,
}

impl PredicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate, intersecting it with any existing one on its column.
    pub fn add(&mut self, pred: ColumnPredicate) {
        match self.by_column.get_mut(&pred.column_index) {
            Some(existing) => existing.merge(&pred),
            None => {
                self.by_column.insert(pred.column_index, pred);
            }
        }
    }

    pub fn get(&self, column_index: usize) -> Option<&ColumnPredicate> {
        self.by_column.get(&column_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnPredicate> {
        self.by_column.values()
    }

    pub fn len(&self) -> usize {
        self.by_column.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_column.is_empty()
    }

    /// Whether some predicate can never match, making the whole scan empty.
    pub fn matches_nothing(&self) -> bool {
        self.by_column.values().any(ColumnPredicate::is_none)
    }

    /// Evaluate every predicate against a full row in table column order.
    pub fn evaluate_row(&self, row: &[Value]) -> bool {
        self.by_column
            .values()
            .all(|p| row.get(p.column_index).is_some_and(|v| p.evaluate(v)))
    }

    pub fn to_encoded(&self) -> Vec<EncodedPredicate> {
        self.by_column.values().map(ColumnPredicate::to_encoded).collect()
    }

    /// Rebuild from wire form, re-validating each predicate against `schema`.
    pub fn from_encoded(schema: &Schema, encoded: &[EncodedPredicate]) -> Result<Self, Error> {
        let mut set = PredicateSet::new();
        for enc in encoded {
            set.add(ColumnPredicate::from_encoded(schema, enc)?);
        }
        Ok(set)
    }
}

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

pub const CODE_NONE: u8 = 0;
pub const CODE_EQUALITY: u8 = 1;
pub const CODE_RANGE: u8 = 2;
pub const CODE_IN_LIST: u8 = 3;
pub const CODE_IS_NOT_NULL: u8 = 4;
pub const CODE_IS_NULL: u8 = 5;

/// A predicate as carried by the open-scan RPC: column index, operator code
/// and cell-encoded operand bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPredicate {
    pub column: usize,
    pub code: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::builder()
            .add_column(ColumnSchema::new("key", DataType::Int32).not_null())
            .add_column(ColumnSchema::new("int_val", DataType::Int32))
            .add_column(ColumnSchema::new("string_val", DataType::String))
            .add_column(ColumnSchema::new("ts", DataType::UnixtimeMicros))
            .set_primary_keys(&["key"])
            .build()
            .unwrap()
    }

    fn val(v: impl Into<Value>) -> Operand {
        Operand::Value(v.into())
    }

    #[test]
    fn test_comparison_normalization() {
        let s = schema();
        let gt = encode_predicate(&s, "key", Operator::Gt, val(19)).unwrap();
        assert_eq!(
            gt.kind(),
            &PredicateKind::Range {
                lower: Some(Value::Int32(20)),
                upper: None
            }
        );

        let le = encode_predicate(&s, "key", Operator::Le, val(49)).unwrap();
        assert_eq!(
            le.kind(),
            &PredicateKind::Range {
                lower: None,
                upper: Some(Value::Int32(50))
            }
        );
    }

    #[test]
    fn test_overflow_edges() {
        let s = schema();
        let gt_max = encode_predicate(&s, "key", Operator::Gt, val(i32::MAX)).unwrap();
        assert!(gt_max.is_none());

        let le_max = encode_predicate(&s, "int_val", Operator::Le, val(i32::MAX)).unwrap();
        assert_eq!(le_max.kind(), &PredicateKind::IsNotNull);
    }

    #[test]
    fn test_range_composition_on_one_column() {
        let s = schema();
        let mut set = PredicateSet::new();
        set.add(encode_predicate(&s, "key", Operator::Gt, val(19)).unwrap());
        set.add(encode_predicate(&s, "key", Operator::Lt, val(50)).unwrap());
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get(0).unwrap().kind(),
            &PredicateKind::Range {
                lower: Some(Value::Int32(20)),
                upper: Some(Value::Int32(50))
            }
        );
        assert!(set.evaluate_row(&[Value::Int32(20), Value::Null, Value::Null, Value::Null]));
        assert!(!set.evaluate_row(&[Value::Int32(50), Value::Null, Value::Null, Value::Null]));
    }

    #[test]
    fn test_consecutive_range_becomes_equality() {
        let s = schema();
        let mut p = encode_predicate(&s, "key", Operator::Ge, val(5)).unwrap();
        p.merge(&encode_predicate(&s, "key", Operator::Lt, val(6)).unwrap());
        assert_eq!(p.kind(), &PredicateKind::Equality(Value::Int32(5)));

        p.merge(&encode_predicate(&s, "key", Operator::Gt, val(5)).unwrap());
        assert!(p.is_none());
    }

    #[test]
    fn test_in_list_sorted_and_merged() {
        let s = schema();
        let mut p = encode_predicate(
            &s,
            0usize,
            Operator::InList,
            Operand::List(vec![98.into(), 2.into(), 98.into(), 40.into()]),
        )
        .unwrap();
        assert_eq!(
            p.kind(),
            &PredicateKind::InList(vec![Value::Int32(2), Value::Int32(40), Value::Int32(98)])
        );
        p.merge(&encode_predicate(&s, "key", Operator::Ge, val(10)).unwrap());
        assert_eq!(
            p.kind(),
            &PredicateKind::InList(vec![Value::Int32(40), Value::Int32(98)])
        );
        p.merge(&encode_predicate(&s, "key", Operator::Lt, val(50)).unwrap());
        assert_eq!(p.kind(), &PredicateKind::Equality(Value::Int32(40)));
    }

    #[test]
    fn test_string_comparison_is_lexicographic() {
        let s = schema();
        let p = encode_predicate(&s, "string_val", Operator::Ge, val("hello_9")).unwrap();
        assert!(p.evaluate(&Value::from("hello_98")));
        assert!(!p.evaluate(&Value::from("hello_2")));
        assert!(!p.evaluate(&Value::from("hello_10")));
        assert!(!p.evaluate(&Value::Null));
    }

    #[test]
    fn test_invalid_predicates() {
        let s = schema();

        let err = encode_predicate(&s, "string_val", Operator::Ge, Operand::Value(Value::Null))
            .unwrap_err();
        assert_eq!(err, PredicateError::NullOperand("string_val".to_string()));

        let err = encode_predicate(&s, "string_val", Operator::Ge, val(1)).unwrap_err();
        assert!(matches!(err, PredicateError::TypeMismatch { .. }));

        let err = encode_predicate(
            &s,
            "string_val",
            Operator::InList,
            Operand::List(vec!["testing".into(), Value::UnixtimeMicros(1)]),
        )
        .unwrap_err();
        assert!(matches!(err, PredicateError::TypeMismatch { .. }));

        let err = encode_predicate(
            &s,
            "string_val",
            Operator::InList,
            Operand::List(vec!["hello_20".into(), 120.into()]),
        )
        .unwrap_err();
        assert!(matches!(err, PredicateError::TypeMismatch { .. }));

        let err = encode_predicate(&s, "nope", Operator::Eq, val(1)).unwrap_err();
        assert_eq!(err, PredicateError::UnknownColumn("nope".to_string()));

        let err = encode_predicate(&s, "key", Operator::Eq, Operand::List(vec![1.into()]))
            .unwrap_err();
        assert!(matches!(err, PredicateError::UnsupportedOperator { .. }));

        let err = encode_predicate(&s, "key", Operator::IsNull, val(1)).unwrap_err();
        assert!(matches!(err, PredicateError::UnsupportedOperator { .. }));
    }

    #[test]
    fn test_null_predicates() {
        let s = schema();
        let is_null = encode_predicate(&s, "string_val", Operator::IsNull, Operand::None).unwrap();
        assert!(is_null.evaluate(&Value::Null));
        assert!(!is_null.evaluate(&Value::from("x")));

        let not_null =
            encode_predicate(&s, "string_val", Operator::IsNotNull, Operand::None).unwrap();
        assert!(!not_null.evaluate(&Value::Null));

        // A non-nullable column can never be null.
        let key_null = encode_predicate(&s, "key", Operator::IsNull, Operand::None).unwrap();
        assert!(key_null.is_none());

        let mut both = is_null.clone();
        both.merge(&not_null);
        assert!(both.is_none());
    }

    #[test]
    fn test_encoded_roundtrip_revalidates() {
        let s = schema();
        let mut set = PredicateSet::new();
        set.add(encode_predicate(&s, "key", Operator::Ge, val(10)).unwrap());
        set.add(
            encode_predicate(
                &s,
                "string_val",
                Operator::InList,
                Operand::List(vec!["a".into(), "b".into()]),
            )
            .unwrap(),
        );
        set.add(encode_predicate(&s, "ts", Operator::IsNull, Operand::None).unwrap());
        let wire = set.to_encoded();
        assert_eq!(PredicateSet::from_encoded(&s, &wire).unwrap(), set);

        // A string operand on an int column is rejected on decode.
        let bad = EncodedPredicate {
            column: 0,
            code: CODE_EQUALITY,
            lower: None,
            upper: None,
            values: vec![b"abc".to_vec()],
        };
        assert!(ColumnPredicate::from_encoded(&s, &bad).is_err());

        let unknown = EncodedPredicate {
            column: 0,
            code: 42,
            lower: None,
            upper: None,
            values: vec![],
        };
        assert_eq!(
            ColumnPredicate::from_encoded(&s, &unknown).unwrap_err(),
            Error::Decode(DecodeError::UnknownPredicateCode(42))
        );
    }

    #[test]
    fn test_display() {
        let s = schema();
        let p = encode_predicate(&s, "key", Operator::Gt, val(19)).unwrap();
        assert_eq!(p.to_string(), "`key` >= 20");
    }
}
