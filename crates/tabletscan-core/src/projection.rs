//! Projection resolution: which table columns a scan returns, and in what
//! order.
//!
//! The resolved projection schema is keyless. Rebuilding a table schema from
//! it with [`SchemaBuilder::copy_column`](crate::schema::SchemaBuilder::copy_column)
//! and `set_primary_keys` yields a schema equal to one built directly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProjectionError;
use crate::schema::Schema;

/// Columns requested by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSelection {
    /// Every column, in table order.
    #[default]
    All,
    Names(Vec<String>),
    Indexes(Vec<usize>),
}

/// A resolved projection: table column indexes plus the schema of the
/// returned rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    indexes: Vec<usize>,
    schema: Arc<Schema>,
}

impl Projection {
    pub fn indexes(&self) -> &[usize] {
        &self.indexes
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

/// Resolve `selection` against `schema`, preserving the caller's order.
///
/// Selecting the same column twice (by name or by index) is rejected.
pub fn resolve(schema: &Schema, selection: &ColumnSelection) -> Result<Projection, ProjectionError> {
    let indexes: Vec<usize> = match selection {
        ColumnSelection::All => (0..schema.column_count()).collect(),
        ColumnSelection::Names(names) => names
            .iter()
            .map(|name| {
                schema
                    .find_column(name)
                    .ok_or_else(|| ProjectionError::UnknownColumn(name.clone()))
            })
            .collect::<Result<_, _>>()?,
        ColumnSelection::Indexes(indexes) => {
            for &index in indexes {
                if index >= schema.column_count() {
                    return Err(ProjectionError::InvalidIndex {
                        index,
                        count: schema.column_count(),
                    });
                }
            }
            indexes.clone()
        }
    };
    from_indexes(schema, indexes)
}

/// Build a projection from already-resolved table column indexes.
pub(crate) fn from_indexes(
    schema: &Schema,
    indexes: Vec<usize>,
) -> Result<Projection, ProjectionError> {
    let mut columns = Vec::with_capacity(indexes.len());
    for (pos, &index) in indexes.iter().enumerate() {
        let column = schema.column(index).ok_or(ProjectionError::InvalidIndex {
            index,
            count: schema.column_count(),
        })?;
        if indexes[..pos].contains(&index) {
            return Err(ProjectionError::DuplicateColumn(column.name.clone()));
        }
        columns.push(column.clone());
    }
    Ok(Projection {
        indexes,
        schema: Arc::new(Schema::keyless(columns)),
    })
}
