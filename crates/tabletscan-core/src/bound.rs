//! Primary key bounds.
//!
//! A bound is a [`PartialRow`] with some leading key columns set, encoded with
//! the canonical key encoding. Lower bounds are inclusive and upper bounds
//! exclusive. [`KeyRange`] combines explicit bounds with the range implied by
//! predicates on key columns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::encoding::{encode_key_prefix, prefix_successor, successor};
use crate::error::BoundError;
use crate::predicate::{PredicateKind, PredicateSet};
use crate::schema::Schema;
use crate::value::Value;

/// A sparse assignment of primary key columns, used as a scan bound.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRow {
    schema: Arc<Schema>,
    key_values: Vec<Option<Value>>,
}

impl PartialRow {
    pub fn new(schema: Arc<Schema>) -> Self {
        let key_values = vec![None; schema.num_key_columns()];
        Self { schema, key_values }
    }

    /// Set a key column. Fails for unknown or non-key columns and for values
    /// that do not convert to the column type.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<&mut Self, BoundError> {
        let index = self
            .schema
            .find_column(column)
            .ok_or_else(|| BoundError::UnknownColumn(column.to_string()))?;
        if !self.schema.is_key_column(index) {
            return Err(BoundError::NotKeyColumn(column.to_string()));
        }
        let col = &self.schema.columns()[index];
        let value = value.into();
        let coerced = value
            .coerce_to(col.data_type)
            .ok_or_else(|| BoundError::TypeMismatch {
                column: col.name.clone(),
                expected: col.data_type,
                actual: value.type_name().to_string(),
            })?;
        self.key_values[index] = Some(coerced);
        Ok(self)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        let index = self.schema.find_column(column)?;
        self.key_values.get(index)?.as_ref()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

/// Encode a bound. The set columns must form a leading prefix of the primary
/// key; an unset trailing suffix sorts before every key sharing the prefix.
pub fn encode_bound(schema: &Schema, row: &PartialRow) -> Result<Vec<u8>, BoundError> {
    let mut prefix = Vec::new();
    let mut gap = false;
    for (column, value) in schema.key_columns().iter().zip(&row.key_values) {
        match value {
            Some(_) if gap => return Err(BoundError::KeyPrefixGap(column.name.clone())),
            Some(v) => prefix.push(v.clone()),
            None => gap = true,
        }
    }
    if prefix.is_empty() {
        return Err(BoundError::EmptyBound);
    }
    encode_key_prefix(schema, &prefix)
}

/// A half-open range of encoded primary keys. `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    /// Inclusive.
    pub lower: Option<Vec<u8>>,
    /// Exclusive.
    pub upper: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a range from explicit bounds. An empty upper bound is kept and
    /// matches nothing.
    pub fn bounded(lower: Option<Vec<u8>>, upper: Option<Vec<u8>>) -> Self {
        Self { lower, upper }
    }

    /// Build a range, treating empty keys as unbounded.
    pub fn new(lower: Option<Vec<u8>>, upper: Option<Vec<u8>>) -> Self {
        Self {
            lower: lower.filter(|k| !k.is_empty()),
            upper: upper.filter(|k| !k.is_empty()),
        }
    }

    pub fn intersect(&self, other: &KeyRange) -> KeyRange {
        let lower = match (&self.lower, &other.lower) {
            (Some(a), Some(b)) => Some(a.max(b).clone()),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let upper = match (&self.upper, &other.upper) {
            (Some(a), Some(b)) => Some(a.min(b).clone()),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        KeyRange { lower, upper }
    }

    pub fn is_empty(&self) -> bool {
        let lower = self.lower.as_deref().unwrap_or_default();
        self.upper.as_deref().is_some_and(|u| lower >= u)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.lower.as_deref().is_none_or(|l| key >= l)
            && self.upper.as_deref().is_none_or(|u| key < u)
    }

    /// Raise the lower bound to `key` if it is tighter.
    pub fn tighten_lower(&mut self, key: Vec<u8>) {
        if self.lower.as_ref().is_none_or(|l| key > *l) {
            self.lower = Some(key);
        }
    }

    /// Lower the upper bound to `key` if it is tighter.
    pub fn tighten_upper(&mut self, key: Vec<u8>) {
        if self.upper.as_ref().is_none_or(|u| key < *u) {
            self.upper = Some(key);
        }
    }

    /// The range left after every key up to and including `last_key` has
    /// been delivered.
    pub fn resume_after(&self, last_key: &[u8]) -> KeyRange {
        let mut resumed = self.clone();
        resumed.tighten_lower(successor(last_key));
        resumed
    }
}

/// The key range implied by predicates on primary key columns.
///
/// Equality predicates on the leading key columns form a fixed prefix; the
/// first key column after it with a range or IN-list predicate narrows the
/// range further. Predicates on later columns are not used.
pub fn predicate_key_range(
    schema: &Schema,
    predicates: &PredicateSet,
) -> Result<KeyRange, BoundError> {
    let num_keys = schema.num_key_columns();
    let mut prefix: Vec<Value> = Vec::new();

    for index in 0..num_keys {
        let is_last = index + 1 == num_keys;
        let kind = predicates.get(index).map(|p| p.kind());
        match kind {
            Some(PredicateKind::Equality(v)) => {
                prefix.push(v.clone());
                continue;
            }
            Some(PredicateKind::Range { lower, upper }) => {
                let lower = match lower {
                    Some(l) => Some(encode_with(schema, &prefix, l)?),
                    None => encode_prefix(schema, &prefix)?,
                };
                let upper = match upper {
                    Some(u) => Some(encode_with(schema, &prefix, u)?),
                    None => encode_prefix(schema, &prefix)?.and_then(|p| prefix_successor(&p)),
                };
                return Ok(KeyRange::new(lower, upper));
            }
            Some(PredicateKind::InList(values)) => {
                let (Some(first), Some(last)) = (values.first(), values.last()) else {
                    break;
                };
                let lower = encode_with(schema, &prefix, first)?;
                let last_key = encode_with(schema, &prefix, last)?;
                let upper = if is_last {
                    Some(successor(&last_key))
                } else {
                    prefix_successor(&last_key)
                };
                return Ok(KeyRange::new(Some(lower), upper));
            }
            _ => break,
        }
    }

    if prefix.len() == num_keys && num_keys > 0 {
        let key = encode_key_prefix(schema, &prefix)?;
        let upper = successor(&key);
        return Ok(KeyRange::new(Some(key), Some(upper)));
    }
    let lower = encode_prefix(schema, &prefix)?;
    let upper = lower.as_deref().and_then(prefix_successor);
    Ok(KeyRange::new(lower, upper))
}

fn encode_with(schema: &Schema, prefix: &[Value], next: &Value) -> Result<Vec<u8>, BoundError> {
    let mut values = prefix.to_vec();
    values.push(next.clone());
    encode_key_prefix(schema, &values)
}

fn encode_prefix(schema: &Schema, prefix: &[Value]) -> Result<Option<Vec<u8>>, BoundError> {
    if prefix.is_empty() {
        return Ok(None);
    }
    encode_key_prefix(schema, prefix).map(Some)
}
