//! Table schemas: ordered columns with a leading primary key.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::types::{DataType, MAX_DECIMAL_PRECISION};

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnSchema {
    /// A nullable column. Key columns must be made non-nullable with
    /// [`not_null`](Self::not_null).
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// An immutable table (or projection) schema.
///
/// The first `num_key_columns` columns form the primary key and define the
/// total order of rows. Projection schemas are keyless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
    num_key_columns: usize,
}

impl Schema {
    /// Start building a table schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// A schema with no primary key, used for projections.
    pub(crate) fn keyless(columns: Vec<ColumnSchema>) -> Self {
        Self {
            columns,
            num_key_columns: 0,
        }
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Option<&ColumnSchema> {
        self.columns.get(index)
    }

    /// Index of the column named `name`.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnSchema> {
        self.find_column(name).map(|i| &self.columns[i])
    }

    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    pub fn key_columns(&self) -> &[ColumnSchema] {
        &self.columns[..self.num_key_columns]
    }

    pub fn is_key_column(&self, index: usize) -> bool {
        index < self.num_key_columns
    }

    /// Re-check every invariant. Used on schemas received over the wire.
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_columns(&self.columns, self.num_key_columns)
    }
}

/// Builder for a [`Schema`].
#[derive(Debug, Default, Clone)]
pub struct SchemaBuilder {
    columns: Vec<ColumnSchema>,
    primary_keys: Vec<String>,
}

impl SchemaBuilder {
    /// Append a column.
    pub fn add_column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    /// Append a copy of an existing column (e.g. from a projection schema).
    pub fn copy_column(mut self, column: &ColumnSchema) -> Self {
        self.columns.push(column.clone());
        self
    }

    /// Name the primary key columns, in key order. They must be the leading
    /// columns of the schema.
    pub fn set_primary_keys<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.primary_keys = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        if self.primary_keys.is_empty() {
            return Err(SchemaError::MissingPrimaryKey);
        }
        for (pos, key) in self.primary_keys.iter().enumerate() {
            let idx = self
                .columns
                .iter()
                .position(|c| &c.name == key)
                .ok_or_else(|| SchemaError::UnknownKeyColumn(key.clone()))?;
            if idx != pos {
                return Err(SchemaError::KeyColumnOrder(key.clone()));
            }
        }
        validate_columns(&self.columns, self.primary_keys.len())?;
        Ok(Schema {
            columns: self.columns,
            num_key_columns: self.primary_keys.len(),
        })
    }
}

fn validate_columns(columns: &[ColumnSchema], num_key_columns: usize) -> Result<(), SchemaError> {
    if columns.is_empty() {
        return Err(SchemaError::Empty);
    }
    for (i, col) in columns.iter().enumerate() {
        if columns[..i].iter().any(|c| c.name == col.name) {
            return Err(SchemaError::DuplicateColumn(col.name.clone()));
        }
        if let DataType::Decimal { precision, scale } = col.data_type {
            if precision == 0 || precision > MAX_DECIMAL_PRECISION || scale > precision {
                return Err(SchemaError::InvalidDecimal {
                    name: col.name.clone(),
                    precision,
                    scale,
                });
            }
        }
        if i < num_key_columns {
            if col.nullable {
                return Err(SchemaError::NullableKeyColumn(col.name.clone()));
            }
            if !col.data_type.is_keyable() {
                return Err(SchemaError::UnkeyableType {
                    name: col.name.clone(),
                    data_type: col.data_type,
                });
            }
        }
    }
    if num_key_columns > columns.len() {
        return Err(SchemaError::MissingPrimaryKey);
    }
    Ok(())
}
