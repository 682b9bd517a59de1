//! Columnar row batch payload.
//!
//! Layout (all integers little-endian):
//! ```text
//! u32 row_count
//! u16 column_count                  must equal the projection width
//! per column, in projection order:
//!   u8  flags                       bit 0: null bitmap present
//!   [u8; ceil(row_count / 8)]       null bitmap, bit i set => row i is null
//!   fixed-width types:
//!     u32 data_len                  row_count * width
//!     [u8; data_len]                null cells are zero-filled
//!   String / Binary:
//!     u32 offsets_len               (row_count + 1) * 4
//!     [u32; row_count + 1]          first 0, non-decreasing
//!     u32 data_len                  equal to the last offset
//!     [u8; data_len]
//! ```
//! The null bitmap is present exactly when the column is nullable. Trailing
//! bytes are rejected. A payload with no columns carries nothing but its row
//! count, so that count is capped at [`MAX_COLUMNLESS_ROWS`].

use std::sync::Arc;

use crate::encoding::cell::decode_fixed_or_var;
use crate::encoding::encode_cell;
use crate::error::{DecodeError, Error};
use crate::schema::Schema;
use crate::types::DataType;
use crate::value::Value;

use super::RowBatch;

const FLAG_NULL_BITMAP: u8 = 0x01;

/// Most rows a payload with an empty projection may claim.
pub const MAX_COLUMNLESS_ROWS: usize = 1 << 20;

/// Encode rows (laid out in `schema` column order) into a batch payload.
pub fn encode_batch(schema: &Schema, rows: &[Vec<Value>]) -> Result<Vec<u8>, Error> {
    let n = rows.len();
    let mut out = Vec::new();
    out.extend_from_slice(&(n as u32).to_le_bytes());
    out.extend_from_slice(&(schema.column_count() as u16).to_le_bytes());

    for (ci, column) in schema.columns().iter().enumerate() {
        let cells = rows
            .iter()
            .enumerate()
            .map(|(ri, row)| {
                let value = row.get(ci).unwrap_or(&Value::Null);
                if value.is_null() {
                    if column.nullable {
                        return Ok(None);
                    }
                    return Err(encode_error(ri, &column.name, "null in non-nullable column"));
                }
                value
                    .coerce_to(column.data_type)
                    .map(Some)
                    .ok_or_else(|| {
                        encode_error(
                            ri,
                            &column.name,
                            &format!("{} value for {} column", value.type_name(), column.data_type),
                        )
                    })
            })
            .collect::<Result<Vec<Option<Value>>, Error>>()?;

        if column.nullable {
            out.push(FLAG_NULL_BITMAP);
            let mut bitmap = vec![0u8; n.div_ceil(8)];
            for (ri, cell) in cells.iter().enumerate() {
                if cell.is_none() {
                    bitmap[ri / 8] |= 1 << (ri % 8);
                }
            }
            out.extend_from_slice(&bitmap);
        } else {
            out.push(0);
        }

        match column.data_type.fixed_width() {
            Some(width) => {
                out.extend_from_slice(&((n * width) as u32).to_le_bytes());
                for cell in &cells {
                    match cell {
                        Some(v) => out.extend_from_slice(&encode_cell(v)),
                        None => out.extend(std::iter::repeat_n(0u8, width)),
                    }
                }
            }
            None => {
                let mut offsets = Vec::with_capacity(n + 1);
                let mut data = Vec::new();
                offsets.push(0u32);
                for cell in &cells {
                    if let Some(v) = cell {
                        data.extend_from_slice(&encode_cell(v));
                    }
                    offsets.push(data.len() as u32);
                }
                out.extend_from_slice(&((offsets.len() * 4) as u32).to_le_bytes());
                for off in offsets {
                    out.extend_from_slice(&off.to_le_bytes());
                }
                out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                out.extend_from_slice(&data);
            }
        }
    }
    Ok(out)
}

fn encode_error(row: usize, column: &str, reason: &str) -> Error {
    Error::Encode {
        row,
        column: column.to_string(),
        reason: reason.to_string(),
    }
}

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.data.len() - self.pos;
        if len > available {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: len,
                available,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Decode a batch payload shaped by the projection `schema`.
pub fn decode_batch(schema: Arc<Schema>, data: &[u8]) -> Result<RowBatch, DecodeError> {
    decode_batch_limited(schema, data, None)
}

/// Like [`decode_batch`], but rejects payloads claiming more than `max_rows`
/// rows.
pub fn decode_batch_limited(
    schema: Arc<Schema>,
    data: &[u8],
    max_rows: Option<usize>,
) -> Result<RowBatch, DecodeError> {
    let mut r = Reader::new(data);
    let n = r.u32()? as usize;
    let column_count = r.u16()? as usize;
    if column_count != schema.column_count() {
        return Err(DecodeError::ColumnCountMismatch {
            expected: schema.column_count(),
            actual: column_count,
        });
    }
    let limit = match (max_rows, column_count) {
        (Some(limit), 0) => Some(limit.min(MAX_COLUMNLESS_ROWS)),
        (None, 0) => Some(MAX_COLUMNLESS_ROWS),
        (limit, _) => limit,
    };
    if let Some(limit) = limit.filter(|limit| n > *limit) {
        return Err(DecodeError::TooManyRows { rows: n, limit });
    }

    let mut columns = Vec::with_capacity(column_count);
    for (ci, column) in schema.columns().iter().enumerate() {
        let flags = r.u8()?;
        let has_bitmap = flags & FLAG_NULL_BITMAP != 0;
        if flags & !FLAG_NULL_BITMAP != 0 || has_bitmap != column.nullable {
            return Err(DecodeError::NullabilityMismatch { column: ci });
        }
        let bitmap = if has_bitmap {
            Some(r.take(n.div_ceil(8))?)
        } else {
            None
        };
        let is_null = |row: usize| bitmap.is_some_and(|b| b[row / 8] & (1 << (row % 8)) != 0);

        let values = match column.data_type.fixed_width() {
            Some(width) => decode_fixed(&mut r, ci, column.data_type, width, n, is_null)?,
            None => decode_var(&mut r, ci, column.data_type, n, is_null)?,
        };
        columns.push(values);
    }

    if r.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(r.remaining()));
    }
    Ok(RowBatch::from_columns(schema, n, columns))
}

fn check_len(column: usize, expected: Option<usize>, actual: usize) -> Result<(), DecodeError> {
    match expected {
        Some(expected) if expected == actual => Ok(()),
        expected => Err(DecodeError::LengthMismatch {
            column,
            expected: expected.unwrap_or(usize::MAX),
            actual,
        }),
    }
}

fn decode_fixed(
    r: &mut Reader<'_>,
    ci: usize,
    ty: DataType,
    width: usize,
    n: usize,
    is_null: impl Fn(usize) -> bool,
) -> Result<Vec<Value>, DecodeError> {
    let len = r.u32()? as usize;
    check_len(ci, n.checked_mul(width), len)?;
    let data = r.take(len)?;

    let mut values = Vec::with_capacity(n);
    for (row, cell) in data.chunks_exact(width).enumerate() {
        if is_null(row) {
            values.push(Value::Null);
            continue;
        }
        let value = decode_fixed_or_var(ty, cell).ok_or(DecodeError::InvalidBool {
            column: ci,
            row,
            byte: cell[0],
        })?;
        values.push(value);
    }
    Ok(values)
}

fn decode_var(
    r: &mut Reader<'_>,
    ci: usize,
    ty: DataType,
    n: usize,
    is_null: impl Fn(usize) -> bool,
) -> Result<Vec<Value>, DecodeError> {
    let offsets_len = r.u32()? as usize;
    check_len(ci, n.checked_add(1).and_then(|m| m.checked_mul(4)), offsets_len)?;
    let offsets: Vec<usize> = r
        .take(offsets_len)?
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .collect();
    if offsets[0] != 0 || offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(DecodeError::InvalidOffsets { column: ci });
    }
    let last = offsets[n];
    let data_len = r.u32()? as usize;
    check_len(ci, Some(last), data_len)?;
    let data = r.take(data_len)?;

    let mut values = Vec::with_capacity(n);
    for row in 0..n {
        if is_null(row) {
            values.push(Value::Null);
            continue;
        }
        let cell = &data[offsets[row]..offsets[row + 1]];
        let value = match ty {
            DataType::String => Value::String(
                std::str::from_utf8(cell)
                    .map_err(|_| DecodeError::InvalidUtf8 { column: ci, row })?
                    .to_string(),
            ),
            _ => Value::Binary(cell.to_vec()),
        };
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::keyless(vec![
            ColumnSchema::new("key", DataType::Int32).not_null(),
            ColumnSchema::new("flag", DataType::Bool),
            ColumnSchema::new("name", DataType::String),
        ]))
    }

    fn rows() -> Vec<Vec<Value>> {
        vec![
            vec![Value::Int32(1), Value::Bool(true), Value::from("a")],
            vec![Value::Int32(2), Value::Null, Value::Null],
            vec![Value::Int32(3), Value::Bool(false), Value::from("héllo")],
        ]
    }

    #[test]
    fn test_exact_layout() {
        let schema = Arc::new(Schema::keyless(vec![
            ColumnSchema::new("k", DataType::Int16).not_null(),
            ColumnSchema::new("s", DataType::String),
        ]));
        let payload = encode_batch(
            &schema,
            &[
                vec![Value::Int16(7), Value::from("ab")],
                vec![Value::Int16(-1), Value::Null],
            ],
        )
        .unwrap();
        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            2, 0, 0, 0,             // row_count
            2, 0,                   // column_count
            0,                      // k: no bitmap
            4, 0, 0, 0,             // k: data_len
            7, 0, 0xFF, 0xFF,
            1,                      // s: bitmap present
            0b10,                   // row 1 null
            12, 0, 0, 0,            // s: offsets_len
            0, 0, 0, 0, 2, 0, 0, 0, 2, 0, 0, 0,
            2, 0, 0, 0,             // s: data_len
            b'a', b'b',
        ];
        assert_eq!(payload, expected);
    }

    #[test]
    fn test_decode_random_access() {
        let schema = schema();
        let payload = encode_batch(&schema, &rows()).unwrap();
        let batch = decode_batch(schema, &payload).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.get(1, 1), Some(&Value::Null));
        assert_eq!(batch.get(2, 2), Some(&Value::from("héllo")));
        assert_eq!(batch.get(3, 0), None);
        assert_eq!(batch.as_tuples(), rows());
    }

    #[test]
    fn test_every_type_survives_a_batch() {
        let schema = Arc::new(Schema::keyless(vec![
            ColumnSchema::new("i8", DataType::Int8).not_null(),
            ColumnSchema::new("i16", DataType::Int16),
            ColumnSchema::new("i32", DataType::Int32),
            ColumnSchema::new("i64", DataType::Int64).not_null(),
            ColumnSchema::new("f", DataType::Float),
            ColumnSchema::new("d", DataType::Double).not_null(),
            ColumnSchema::new("b", DataType::Bool),
            ColumnSchema::new("s", DataType::String).not_null(),
            ColumnSchema::new("bin", DataType::Binary),
            ColumnSchema::new("ts", DataType::UnixtimeMicros),
            ColumnSchema::new(
                "dec",
                DataType::Decimal {
                    precision: 38,
                    scale: 4,
                },
            ),
        ]));
        let rows = vec![
            vec![
                Value::Int8(i8::MIN),
                Value::Int16(i16::MAX),
                Value::Int32(-7),
                Value::Int64(i64::MAX),
                Value::Float(-0.5),
                Value::Double(f64::MIN_POSITIVE),
                Value::Bool(true),
                Value::from(""),
                Value::Binary(vec![0x00, 0xFF, 0x00]),
                Value::UnixtimeMicros(1_700_000_000_123_456),
                Value::Decimal(-(10i128.pow(38) - 1)),
            ],
            vec![
                Value::Int8(0),
                Value::Null,
                Value::Null,
                Value::Int64(i64::MIN),
                Value::Null,
                Value::Double(f64::INFINITY),
                Value::Null,
                Value::from("日本"),
                Value::Null,
                Value::Null,
                Value::Null,
            ],
            vec![
                Value::Int8(i8::MAX),
                Value::Int16(-1),
                Value::Int32(i32::MAX),
                Value::Int64(0),
                Value::Float(f32::MAX),
                Value::Double(-2.25),
                Value::Bool(false),
                Value::from("z"),
                Value::Binary(Vec::new()),
                Value::UnixtimeMicros(-1),
                Value::Decimal(12_345_678),
            ],
        ];
        let payload = encode_batch(&schema, &rows).unwrap();
        let batch = decode_batch(schema, &payload).unwrap();
        assert_eq!(batch.as_tuples(), rows);
    }

    #[test]
    fn test_columnless_row_count_is_capped() {
        let schema = Arc::new(Schema::keyless(Vec::new()));
        let payload = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00];
        assert_eq!(
            decode_batch(schema.clone(), &payload).unwrap_err(),
            DecodeError::TooManyRows {
                rows: u32::MAX as usize,
                limit: MAX_COLUMNLESS_ROWS
            }
        );

        let five = encode_batch(&schema, &vec![Vec::new(); 5]).unwrap();
        assert_eq!(decode_batch(schema.clone(), &five).unwrap().len(), 5);
        assert_eq!(
            decode_batch_limited(schema, &five, Some(4)).unwrap_err(),
            DecodeError::TooManyRows { rows: 5, limit: 4 }
        );
    }

    #[test]
    fn test_row_limit_applies_to_any_projection() {
        let schema = schema();
        let payload = encode_batch(&schema, &rows()).unwrap();
        assert_eq!(decode_batch_limited(schema.clone(), &payload, Some(3)).unwrap().len(), 3);
        assert_eq!(
            decode_batch_limited(schema, &payload, Some(2)).unwrap_err(),
            DecodeError::TooManyRows { rows: 3, limit: 2 }
        );
    }

    #[test]
    fn test_empty_batch() {
        let schema = schema();
        let payload = encode_batch(&schema, &[]).unwrap();
        let batch = decode_batch(schema, &payload).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_encode_rejects_bad_rows() {
        let schema = schema();
        let err = encode_batch(&schema, &[vec![Value::Null, Value::Null, Value::Null]]).unwrap_err();
        assert!(matches!(err, Error::Encode { row: 0, .. }));
        let err = encode_batch(&schema, &[vec![Value::from("x"), Value::Null, Value::Null]])
            .unwrap_err();
        assert!(matches!(err, Error::Encode { .. }));
    }

    #[test]
    fn test_rejects_truncated() {
        let schema = schema();
        let payload = encode_batch(&schema, &rows()).unwrap();
        for cut in [0, 3, 6, payload.len() - 1] {
            assert!(matches!(
                decode_batch(schema.clone(), &payload[..cut]),
                Err(DecodeError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let schema = schema();
        let mut payload = encode_batch(&schema, &rows()).unwrap();
        payload.push(0);
        assert_eq!(
            decode_batch(schema, &payload).unwrap_err(),
            DecodeError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_rejects_column_count_and_nullability() {
        let schema = schema();
        let payload = encode_batch(&schema, &rows()).unwrap();

        let narrow = Arc::new(Schema::keyless(vec![
            ColumnSchema::new("key", DataType::Int32).not_null(),
        ]));
        assert_eq!(
            decode_batch(narrow, &payload).unwrap_err(),
            DecodeError::ColumnCountMismatch {
                expected: 1,
                actual: 3
            }
        );

        let mut flipped = payload.clone();
        flipped[6] = FLAG_NULL_BITMAP;
        assert_eq!(
            decode_batch(schema, &flipped).unwrap_err(),
            DecodeError::NullabilityMismatch { column: 0 }
        );
    }

    #[test]
    fn test_rejects_bad_cells() {
        let schema = Arc::new(Schema::keyless(vec![
            ColumnSchema::new("b", DataType::Bool).not_null(),
            ColumnSchema::new("s", DataType::String).not_null(),
        ]));
        let payload =
            encode_batch(&schema, &[vec![Value::Bool(true), Value::from("ok")]]).unwrap();

        // Layout: 6 header, b: flags(1) len(4) data(1) => bool byte at 11.
        let mut bad_bool = payload.clone();
        bad_bool[11] = 2;
        assert_eq!(
            decode_batch(schema.clone(), &bad_bool).unwrap_err(),
            DecodeError::InvalidBool {
                column: 0,
                row: 0,
                byte: 2
            }
        );

        // s: flags at 12, offsets_len at 13, offsets at 17..25, data_len at 25, data at 29.
        let mut bad_utf8 = payload.clone();
        bad_utf8[29] = 0xFF;
        assert_eq!(
            decode_batch(schema.clone(), &bad_utf8).unwrap_err(),
            DecodeError::InvalidUtf8 { column: 1, row: 0 }
        );

        let mut bad_offsets = payload.clone();
        bad_offsets[17] = 1;
        assert_eq!(
            decode_batch(schema.clone(), &bad_offsets).unwrap_err(),
            DecodeError::InvalidOffsets { column: 1 }
        );

        let mut bad_len = payload;
        bad_len[25] = 3;
        assert!(matches!(
            decode_batch(schema, &bad_len).unwrap_err(),
            DecodeError::LengthMismatch { column: 1, .. }
        ));
    }
}
