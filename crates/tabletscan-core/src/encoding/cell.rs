use crate::error::DecodeError;
use crate::types::DataType;
use crate::value::Value;

/// Encode a non-null value as a standalone cell: little-endian for fixed-width
/// types, raw bytes for String and Binary. Used for predicate operands on the
/// wire.
pub fn encode_cell(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => Vec::new(),
        Value::Int8(v) => v.to_le_bytes().to_vec(),
        Value::Int16(v) => v.to_le_bytes().to_vec(),
        Value::Int32(v) => v.to_le_bytes().to_vec(),
        Value::Int64(v) | Value::UnixtimeMicros(v) => v.to_le_bytes().to_vec(),
        Value::Float(v) => v.to_le_bytes().to_vec(),
        Value::Double(v) => v.to_le_bytes().to_vec(),
        Value::Bool(v) => vec![u8::from(*v)],
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Binary(b) => b.clone(),
        Value::Decimal(v) => v.to_le_bytes().to_vec(),
    }
}

/// Decode a standalone cell of type `ty`. The slice must be exactly one cell.
pub fn decode_cell(ty: DataType, data: &[u8]) -> Result<Value, DecodeError> {
    if let Some(width) = ty.fixed_width() {
        if data.len() != width {
            return Err(DecodeError::MalformedCell(ty));
        }
    }
    decode_fixed_or_var(ty, data).ok_or(DecodeError::MalformedCell(ty))
}

/// Decode one cell whose length has already been checked against the type's
/// width. Returns `None` for invalid bool bytes or invalid UTF-8.
pub(crate) fn decode_fixed_or_var(ty: DataType, data: &[u8]) -> Option<Value> {
    let value = match ty {
        DataType::Int8 => Value::Int8(i8::from_le_bytes(data.try_into().ok()?)),
        DataType::Int16 => Value::Int16(i16::from_le_bytes(data.try_into().ok()?)),
        DataType::Int32 => Value::Int32(i32::from_le_bytes(data.try_into().ok()?)),
        DataType::Int64 => Value::Int64(i64::from_le_bytes(data.try_into().ok()?)),
        DataType::UnixtimeMicros => {
            Value::UnixtimeMicros(i64::from_le_bytes(data.try_into().ok()?))
        }
        DataType::Float => Value::Float(f32::from_le_bytes(data.try_into().ok()?)),
        DataType::Double => Value::Double(f64::from_le_bytes(data.try_into().ok()?)),
        DataType::Decimal { .. } => Value::Decimal(i128::from_le_bytes(data.try_into().ok()?)),
        DataType::Bool => match data {
            [0] => Value::Bool(false),
            [1] => Value::Bool(true),
            _ => return None,
        },
        DataType::String => Value::String(std::str::from_utf8(data).ok()?.to_string()),
        DataType::Binary => Value::Binary(data.to_vec()),
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_widths() {
        assert_eq!(encode_cell(&Value::Int32(-2)), vec![0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(encode_cell(&Value::Bool(true)), vec![1]);
        assert_eq!(encode_cell(&Value::from("hi")), b"hi".to_vec());
        assert_eq!(encode_cell(&Value::Decimal(1)).len(), 16);
    }

    #[test]
    fn test_decode_cell() {
        let cell = encode_cell(&Value::UnixtimeMicros(1_473_894_692_432_019));
        assert_eq!(
            decode_cell(DataType::UnixtimeMicros, &cell).unwrap(),
            Value::UnixtimeMicros(1_473_894_692_432_019)
        );
        assert_eq!(
            decode_cell(DataType::String, b"hello_9").unwrap(),
            Value::from("hello_9")
        );
    }

    #[test]
    fn test_decode_cell_rejects_bad_input() {
        assert_eq!(
            decode_cell(DataType::Int32, &[1, 2, 3]),
            Err(DecodeError::MalformedCell(DataType::Int32))
        );
        assert_eq!(
            decode_cell(DataType::Bool, &[2]),
            Err(DecodeError::MalformedCell(DataType::Bool))
        );
        assert_eq!(
            decode_cell(DataType::String, &[0xFF, 0xFE]),
            Err(DecodeError::MalformedCell(DataType::String))
        );
    }
}
