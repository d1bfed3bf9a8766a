use crate::compressed_float::{compressed_f64_len, read_compressed_f64, write_compressed_f64};
use crate::compressed_uint::{compressed_u32_len, read_compressed_u32, write_compressed_u32};
use crate::CodecError;

/// Heterogeneous tuple codec: a record is the plain concatenation of its
/// element encodings, so the reader needs the element types to take it
/// apart again.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TupleType {
    /// Compressed f64.
    Number,
    /// Compressed u32.
    Uint32,
    /// Fixed four-byte big-endian u32.
    Uint32Raw,
    /// Compressed-u32 length prefix + UTF-8 bytes.
    String,
    /// Compressed-u32 length prefix + raw bytes.
    Array,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TupleValue {
    Number(f64),
    Uint32(u32),
    Uint32Raw(u32),
    String(String),
    Array(Vec<u8>),
}

impl TupleValue {
    pub fn tuple_type(&self) -> TupleType {
        match self {
            TupleValue::Number(_) => TupleType::Number,
            TupleValue::Uint32(_) => TupleType::Uint32,
            TupleValue::Uint32Raw(_) => TupleType::Uint32Raw,
            TupleValue::String(_) => TupleType::String,
            TupleValue::Array(_) => TupleType::Array,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            TupleValue::Number(v) => compressed_f64_len(*v),
            TupleValue::Uint32(v) => compressed_u32_len(*v),
            TupleValue::Uint32Raw(_) => 4,
            TupleValue::String(s) => compressed_u32_len(s.len() as u32) + s.len(),
            TupleValue::Array(a) => compressed_u32_len(a.len() as u32) + a.len(),
        }
    }
}

/// Total encoded length of `values`.
pub fn tuple_len(values: &[TupleValue]) -> usize {
    values.iter().map(TupleValue::encoded_len).sum()
}

/// Write `values` at `buf[offset..]`, returning the number of bytes written.
/// Fails with `OffsetOutOfBounds` when the encoding does not fit.
pub fn write_tuple(buf: &mut [u8], offset: usize, values: &[TupleValue]) -> Result<usize, CodecError> {
    let needed = tuple_len(values);
    if offset > buf.len() || buf.len() - offset < needed {
        return Err(CodecError::OffsetOutOfBounds {
            offset: offset + needed,
            len: buf.len(),
        });
    }

    let mut pos = offset;
    for value in values {
        match value {
            TupleValue::Number(v) => pos += write_compressed_f64(buf, pos, *v)?,
            TupleValue::Uint32(v) => pos += write_compressed_u32(buf, pos, *v)?,
            TupleValue::Uint32Raw(v) => {
                buf[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
                pos += 4;
            }
            TupleValue::String(s) => {
                pos += write_compressed_u32(buf, pos, s.len() as u32)?;
                buf[pos..pos + s.len()].copy_from_slice(s.as_bytes());
                pos += s.len();
            }
            TupleValue::Array(a) => {
                pos += write_compressed_u32(buf, pos, a.len() as u32)?;
                buf[pos..pos + a.len()].copy_from_slice(a);
                pos += a.len();
            }
        }
    }
    Ok(pos - offset)
}

/// Read a tuple of the given element types at `buf[offset..]`, returning
/// the values and the number of bytes consumed.
pub fn read_tuple(
    buf: &[u8],
    offset: usize,
    types: &[TupleType],
) -> Result<(Vec<TupleValue>, usize), CodecError> {
    let mut pos = offset;
    let mut values = Vec::with_capacity(types.len());
    for ty in types {
        match ty {
            TupleType::Number => {
                let (v, consumed) = read_compressed_f64(buf, pos)?;
                values.push(TupleValue::Number(v));
                pos += consumed;
            }
            TupleType::Uint32 => {
                if pos >= buf.len() {
                    return Err(CodecError::InvalidEncoding("truncated tuple"));
                }
                let (v, consumed) = read_compressed_u32(buf, pos);
                if pos + consumed > buf.len() {
                    return Err(CodecError::InvalidEncoding("truncated tuple"));
                }
                values.push(TupleValue::Uint32(v));
                pos += consumed;
            }
            TupleType::Uint32Raw => {
                let raw = buf
                    .get(pos..pos + 4)
                    .ok_or(CodecError::InvalidEncoding("truncated tuple"))?;
                values.push(TupleValue::Uint32Raw(u32::from_be_bytes([
                    raw[0], raw[1], raw[2], raw[3],
                ])));
                pos += 4;
            }
            TupleType::String | TupleType::Array => {
                if pos >= buf.len() {
                    return Err(CodecError::InvalidEncoding("truncated tuple"));
                }
                let (len, consumed) = read_compressed_u32(buf, pos);
                pos += consumed;
                let bytes = buf
                    .get(pos..pos + len as usize)
                    .ok_or(CodecError::InvalidEncoding("truncated tuple"))?;
                pos += len as usize;
                values.push(match ty {
                    TupleType::String => TupleValue::String(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|_| CodecError::InvalidEncoding("tuple string not UTF-8"))?,
                    ),
                    _ => TupleValue::Array(bytes.to_vec()),
                });
            }
        }
    }
    Ok((values, pos - offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_mixed() {
        let values = vec![
            TupleValue::Uint32Raw(1),
            TupleValue::Uint32(123_456),
            TupleValue::Number(3.25),
            TupleValue::String("page".to_string()),
            TupleValue::Array(vec![0xAA, 0xBB, 0xCC]),
        ];
        let types: Vec<TupleType> = values.iter().map(TupleValue::tuple_type).collect();

        let mut buf = vec![0u8; tuple_len(&values)];
        let written = write_tuple(&mut buf, 0, &values).unwrap();
        assert_eq!(written, buf.len());

        let (read, consumed) = read_tuple(&buf, 0, &types).unwrap();
        assert_eq!(read, values);
        assert_eq!(consumed, written);
    }

    #[test]
    fn test_empty_tuple() {
        let mut buf = [0u8; 0];
        assert_eq!(write_tuple(&mut buf, 0, &[]).unwrap(), 0);
        let (values, consumed) = read_tuple(&buf, 0, &[]).unwrap();
        assert!(values.is_empty());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_does_not_fit() {
        let values = vec![TupleValue::String("too long for this".to_string())];
        let mut buf = [0u8; 4];
        assert!(matches!(
            write_tuple(&mut buf, 0, &values),
            Err(CodecError::OffsetOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_truncated_read_rejected() {
        let values = vec![TupleValue::Array(vec![1, 2, 3, 4, 5])];
        let mut buf = vec![0u8; tuple_len(&values)];
        write_tuple(&mut buf, 0, &values).unwrap();
        assert!(read_tuple(&buf[..3], 0, &[TupleType::Array]).is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        // Length 2, then invalid UTF-8 bytes.
        let buf = [2u8, 0xFF, 0xFE];
        assert!(matches!(
            read_tuple(&buf, 0, &[TupleType::String]),
            Err(CodecError::InvalidEncoding("tuple string not UTF-8"))
        ));
    }
}
