use crate::error::DecodeError;

/// Append `data` using the escaped-terminator scheme.
///
/// Every `0x00` byte is written as `0x00 0x01` and the field ends with
/// `0x00 0x00`. A field encoded this way sorts before any longer field that
/// shares its prefix, so it can be followed by further key columns without
/// breaking byte order.
pub fn encode_escaped(data: &[u8], out: &mut Vec<u8>) {
    out.reserve(data.len() + 2);
    for &b in data {
        if b == 0x00 {
            out.extend_from_slice(&[0x00, 0x01]);
        } else {
            out.push(b);
        }
    }
    out.extend_from_slice(&[0x00, 0x00]);
}

/// Decode an escaped field from the front of `data`.
///
/// Returns `(decoded_bytes, bytes_consumed)`; `bytes_consumed` includes the
/// two-byte terminator.
pub fn decode_escaped(data: &[u8]) -> Result<(Vec<u8>, usize), DecodeError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        if data[i] != 0x00 {
            out.push(data[i]);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(0x00) => return Ok((out, i + 2)),
            Some(0x01) => {
                out.push(0x00);
                i += 2;
            }
            _ => return Err(DecodeError::MalformedKey),
        }
    }
    Err(DecodeError::MalformedKey)
}
