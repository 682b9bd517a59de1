//! Decoded row batches.

pub mod codec;

use std::sync::Arc;

use crate::schema::Schema;
use crate::value::Value;

pub use codec::{decode_batch, decode_batch_limited, encode_batch};

/// One materialized row, in projection column order.
pub type Row = Vec<Value>;

/// An immutable batch of rows shaped by a projection schema.
///
/// Cells are stored column-major as decoded from the payload. Rows can be
/// read by index, iterated, or materialized once with
/// [`as_tuples`](Self::as_tuples).
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    schema: Arc<Schema>,
    num_rows: usize,
    columns: Vec<Vec<Value>>,
}

impl RowBatch {
    pub(crate) fn from_columns(schema: Arc<Schema>, num_rows: usize, columns: Vec<Vec<Value>>) -> Self {
        Self {
            schema,
            num_rows,
            columns,
        }
    }

    /// A batch with no rows.
    pub fn empty(schema: Arc<Schema>) -> Self {
        let columns = vec![Vec::new(); schema.column_count()];
        Self::from_columns(schema, 0, columns)
    }

    pub fn len(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The cell at `(row, column)`.
    pub fn get(&self, row: usize, column: usize) -> Option<&Value> {
        self.columns.get(column)?.get(row)
    }

    /// A copy of row `i`.
    pub fn row(&self, i: usize) -> Option<Row> {
        if i >= self.num_rows {
            return None;
        }
        Some(self.columns.iter().map(|c| c[i].clone()).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = Row> + '_ {
        (0..self.num_rows).map(|i| self.columns.iter().map(|c| c[i].clone()).collect())
    }

    /// Materialize every row, consuming the batch.
    pub fn as_tuples(self) -> Vec<Row> {
        let mut rows: Vec<Row> = (0..self.num_rows)
            .map(|_| Vec::with_capacity(self.columns.len()))
            .collect();
        for column in self.columns {
            for (row, value) in rows.iter_mut().zip(column) {
                row.push(value);
            }
        }
        rows
    }
}

impl IntoIterator for RowBatch {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_tuples().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;
    use crate::types::DataType;

    fn batch() -> RowBatch {
        let schema = Arc::new(Schema::keyless(vec![
            ColumnSchema::new("key", DataType::Int32).not_null(),
            ColumnSchema::new("string_val", DataType::String),
        ]));
        let rows = vec![
            vec![Value::Int32(98), Value::from("hello_98")],
            vec![Value::Int32(99), Value::Null],
        ];
        let payload = encode_batch(&schema, &rows).unwrap();
        decode_batch(schema, &payload).unwrap()
    }

    #[test]
    fn test_row_access() {
        let b = batch();
        assert_eq!(b.row(0), Some(vec![Value::Int32(98), Value::from("hello_98")]));
        assert_eq!(b.row(2), None);
        assert_eq!(b.iter().count(), 2);
        assert_eq!(b.schema().column(1).unwrap().name, "string_val");
    }

    #[test]
    fn test_into_iter_matches_tuples() {
        let b = batch();
        let collected: Vec<Row> = b.clone().into_iter().collect();
        assert_eq!(collected, b.as_tuples());
    }

    #[test]
    fn test_empty() {
        let b = RowBatch::empty(Arc::new(Schema::keyless(vec![ColumnSchema::new(
            "x",
            DataType::Int8,
        )])));
        assert!(b.is_empty());
        assert!(b.as_tuples().is_empty());
    }
}
