//! Typed block encoder/decoder.
//!
//! Block payload layout, chosen by the values present:
//!
//! ```text
//! [1][kind]                         all values share one kind (no NA)
//! [1][kind=undefined]               all values NA
//! [2][kind][undefined bitmap]       one kind plus NAs; defined values only
//! [255]                            mixed kinds; fully tagged values
//! ```
//!
//! Homogeneous payloads store untagged value bodies; the kind byte in the
//! header disambiguates. The caller compresses the result and records the
//! element count in the block's `BlockInfo`.

use xframe_types::bitset::DenseBitset;
use xframe_types::error::{Result, XFrameError};
use xframe_types::serialization::{
    read_u8, read_value, read_value_body, write_u8, write_value, write_value_body,
};
use xframe_types::value::{Value, ValueKind};

const MIXED_BLOCK: u8 = 255;

/// Encode a block of values.
pub fn encode_block(values: &[Value]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(vec![0u8]);
    }

    let mut has_undefined = false;
    let mut data_kind: Option<ValueKind> = None;
    let mut homogeneous = true;

    for val in values {
        match val {
            Value::Undefined => has_undefined = true,
            other => {
                let k = other.kind();
                match data_kind {
                    None => data_kind = Some(k),
                    Some(existing) if existing == k => {}
                    Some(_) => {
                        homogeneous = false;
                        break;
                    }
                }
            }
        }
    }

    if !homogeneous {
        let mut buf = Vec::new();
        write_u8(&mut buf, MIXED_BLOCK)?;
        for val in values {
            write_value(&mut buf, val)?;
        }
        return Ok(buf);
    }

    let kind = match data_kind {
        Some(k) => k,
        None => {
            // All NA.
            let mut buf = Vec::new();
            write_u8(&mut buf, 1)?;
            write_u8(&mut buf, ValueKind::Undefined as u8)?;
            return Ok(buf);
        }
    };

    let mut buf = Vec::new();
    if has_undefined {
        write_u8(&mut buf, 2)?;
        write_u8(&mut buf, kind as u8)?;
        let mut bitmap = DenseBitset::new(values.len());
        for (i, val) in values.iter().enumerate() {
            if val.is_na() {
                bitmap.set(i);
            }
        }
        bitmap.serialize(&mut buf)?;
        for val in values {
            if !val.is_na() {
                write_value_body(&mut buf, val)?;
            }
        }
    } else {
        write_u8(&mut buf, 1)?;
        write_u8(&mut buf, kind as u8)?;
        for val in values {
            write_value_body(&mut buf, val)?;
        }
    }
    Ok(buf)
}

/// Decode a block of `num_elem` values.
pub fn decode_block(bytes: &[u8], num_elem: usize) -> Result<Vec<Value>> {
    let mut reader = std::io::Cursor::new(bytes);
    let header = read_u8(&mut reader)?;

    match header {
        0 => {
            if num_elem != 0 {
                return Err(XFrameError::Parse(format!(
                    "empty block header but {} elements expected",
                    num_elem
                )));
            }
            Ok(Vec::new())
        }
        1 => {
            let kind = ValueKind::try_from(read_u8(&mut reader)?)?;
            if kind == ValueKind::Undefined {
                return Ok(vec![Value::Undefined; num_elem]);
            }
            let mut values = Vec::with_capacity(num_elem);
            for _ in 0..num_elem {
                values.push(read_value_body(&mut reader, kind)?);
            }
            Ok(values)
        }
        2 => {
            let kind = ValueKind::try_from(read_u8(&mut reader)?)?;
            let bitmap = DenseBitset::deserialize(&mut reader)?;
            if bitmap.len() != num_elem {
                return Err(XFrameError::Parse(format!(
                    "undefined bitmap covers {} rows, block has {}",
                    bitmap.len(),
                    num_elem
                )));
            }
            let mut values = Vec::with_capacity(num_elem);
            for i in 0..num_elem {
                if bitmap.get(i) {
                    values.push(Value::Undefined);
                } else {
                    values.push(read_value_body(&mut reader, kind)?);
                }
            }
            Ok(values)
        }
        MIXED_BLOCK => {
            let mut values = Vec::with_capacity(num_elem);
            for _ in 0..num_elem {
                values.push(read_value(&mut reader)?);
            }
            Ok(values)
        }
        other => Err(XFrameError::Parse(format!(
            "unknown block header byte: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn roundtrip(values: &[Value]) -> Vec<Value> {
        let encoded = encode_block(values).unwrap();
        decode_block(&encoded, values.len()).unwrap()
    }

    #[test]
    fn test_homogeneous_integers() {
        let values: Vec<Value> = (0..100).map(Value::Integer).collect();
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn test_with_undefineds() {
        let values: Vec<Value> = (0..50)
            .map(|i| {
                if i % 7 == 0 {
                    Value::Undefined
                } else {
                    Value::Float(i as f64 * 0.5)
                }
            })
            .collect();
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn test_all_undefined() {
        let values = vec![Value::Undefined; 12];
        let encoded = encode_block(&values).unwrap();
        assert_eq!(encoded.len(), 2); // header + kind only
        assert_eq!(decode_block(&encoded, 12).unwrap(), values);
    }

    #[test]
    fn test_mixed_kinds() {
        let values = vec![
            Value::Integer(1),
            Value::String("two".into()),
            Value::Float(3.0),
            Value::Undefined,
            Value::List(Arc::from(vec![Value::Integer(5)])),
        ];
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn test_empty_block() {
        let values: Vec<Value> = vec![];
        let encoded = encode_block(&values).unwrap();
        assert_eq!(encoded, vec![0u8]);
        assert!(decode_block(&encoded, 0).unwrap().is_empty());
    }

    #[test]
    fn test_strings_and_vectors() {
        let values = vec![
            Value::String("alpha".into()),
            Value::String("".into()),
            Value::String("βγδ".into()),
        ];
        assert_eq!(roundtrip(&values), values);

        let values = vec![
            Value::Vector(vec![1.0, 2.0].into()),
            Value::Vector(vec![].into()),
        ];
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn test_element_count_mismatch_rejected() {
        let encoded = encode_block(&[]).unwrap();
        assert!(decode_block(&encoded, 3).is_err());
    }
}
