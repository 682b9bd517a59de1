use crate::error::{BoundError, DecodeError};
use crate::schema::{ColumnSchema, Schema};
use crate::types::DataType;
use crate::value::Value;

use super::binary::{decode_escaped, encode_escaped};

/// Append the memcmp-ordered encoding of one key column.
///
/// Integers, timestamps and decimals are written big-endian with the sign bit
/// flipped. String and Binary are written raw when they are the last key
/// column and escaped otherwise. `value` must already be of the column's type.
pub fn encode_key_column(
    column: &ColumnSchema,
    value: &Value,
    is_last: bool,
    out: &mut Vec<u8>,
) -> Result<(), BoundError> {
    match (column.data_type, value) {
        (DataType::Int8, Value::Int8(v)) => out.push((*v as u8) ^ 0x80),
        (DataType::Int16, Value::Int16(v)) => {
            out.extend_from_slice(&((*v as u16) ^ (1 << 15)).to_be_bytes())
        }
        (DataType::Int32, Value::Int32(v)) => {
            out.extend_from_slice(&((*v as u32) ^ (1 << 31)).to_be_bytes())
        }
        (DataType::Int64, Value::Int64(v))
        | (DataType::UnixtimeMicros, Value::UnixtimeMicros(v)) => {
            out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes())
        }
        (DataType::Decimal { .. }, Value::Decimal(v)) => {
            out.extend_from_slice(&((*v as u128) ^ (1 << 127)).to_be_bytes())
        }
        (DataType::String, Value::String(s)) => encode_bytes(s.as_bytes(), is_last, out),
        (DataType::Binary, Value::Binary(b)) => encode_bytes(b, is_last, out),
        (expected, actual) => {
            return Err(BoundError::TypeMismatch {
                column: column.name.clone(),
                expected,
                actual: actual.type_name().to_string(),
            });
        }
    }
    Ok(())
}

fn encode_bytes(data: &[u8], is_last: bool, out: &mut Vec<u8>) {
    if is_last {
        out.extend_from_slice(data);
    } else {
        encode_escaped(data, out);
    }
}

/// Encode the leading key columns of `values` (one value per key column, in
/// key order). Fewer values than key columns encodes a key prefix.
pub fn encode_key_prefix(schema: &Schema, values: &[Value]) -> Result<Vec<u8>, BoundError> {
    let key_columns = schema.key_columns();
    let mut out = Vec::new();
    for (pos, (column, value)) in key_columns.iter().zip(values).enumerate() {
        encode_key_column(column, value, pos + 1 == key_columns.len(), &mut out)?;
    }
    Ok(out)
}

/// Encode the full primary key of a row laid out in table column order.
pub fn encode_row_key(schema: &Schema, row: &[Value]) -> Result<Vec<u8>, BoundError> {
    let n = schema.num_key_columns();
    if row.len() < n {
        return Err(BoundError::EmptyBound);
    }
    encode_key_prefix(schema, &row[..n])
}

/// Decode a full encoded primary key into one value per key column.
pub fn decode_row_key(schema: &Schema, data: &[u8]) -> Result<Vec<Value>, DecodeError> {
    let key_columns = schema.key_columns();
    let mut values = Vec::with_capacity(key_columns.len());
    let mut rest = data;
    for (pos, column) in key_columns.iter().enumerate() {
        let is_last = pos + 1 == key_columns.len();
        let (value, consumed) = decode_key_column(column.data_type, rest, is_last)?;
        values.push(value);
        rest = &rest[consumed..];
    }
    if !rest.is_empty() {
        return Err(DecodeError::MalformedKey);
    }
    Ok(values)
}

fn decode_key_column(
    ty: DataType,
    data: &[u8],
    is_last: bool,
) -> Result<(Value, usize), DecodeError> {
    fn take<const N: usize>(data: &[u8]) -> Result<[u8; N], DecodeError> {
        data.get(..N)
            .and_then(|s| s.try_into().ok())
            .ok_or(DecodeError::MalformedKey)
    }

    match ty {
        DataType::Int8 => Ok((Value::Int8((take::<1>(data)?[0] ^ 0x80) as i8), 1)),
        DataType::Int16 => {
            let v = u16::from_be_bytes(take(data)?) ^ (1 << 15);
            Ok((Value::Int16(v as i16), 2))
        }
        DataType::Int32 => {
            let v = u32::from_be_bytes(take(data)?) ^ (1 << 31);
            Ok((Value::Int32(v as i32), 4))
        }
        DataType::Int64 | DataType::UnixtimeMicros => {
            let v = (u64::from_be_bytes(take(data)?) ^ (1 << 63)) as i64;
            let value = if ty == DataType::Int64 {
                Value::Int64(v)
            } else {
                Value::UnixtimeMicros(v)
            };
            Ok((value, 8))
        }
        DataType::Decimal { .. } => {
            let v = u128::from_be_bytes(take(data)?) ^ (1 << 127);
            Ok((Value::Decimal(v as i128), 16))
        }
        DataType::String | DataType::Binary => {
            let (bytes, consumed) = if is_last {
                (data.to_vec(), data.len())
            } else {
                decode_escaped(data)?
            };
            let value = if ty == DataType::String {
                Value::String(String::from_utf8(bytes).map_err(|_| DecodeError::MalformedKey)?)
            } else {
                Value::Binary(bytes)
            };
            Ok((value, consumed))
        }
        DataType::Float | DataType::Double | DataType::Bool => Err(DecodeError::MalformedKey),
    }
}

/// The smallest key strictly greater than `key`. Turns an exclusive lower
/// bound into an inclusive one.
pub fn successor(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.extend_from_slice(key);
    out.push(0x00);
    out
}

/// The smallest key greater than every key that starts with `prefix`, or
/// `None` if no such key exists (the prefix is empty or all `0xFF`).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != 0xFF {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}
