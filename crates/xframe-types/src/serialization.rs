//! Archive serialization: the little-endian wire format used by block
//! payloads, segment footers and the sort partition array.
//!
//! - Integers and doubles: raw LE bytes
//! - Strings and vectors: 8-byte LE length prefix + raw bytes/elements
//! - Values: 1-byte tag (`128 + kind`) + payload

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{Result, XFrameError};
use crate::ndarray::NdArray;
use crate::value::{DateTimeValue, Value, ValueKind};

const VALUE_TAG_OFFSET: u8 = 128;

// --- Primitive readers ---

pub fn read_u8(reader: &mut (impl Read + ?Sized)) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u16(reader: &mut (impl Read + ?Sized)) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32(reader: &mut (impl Read + ?Sized)) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64(reader: &mut (impl Read + ?Sized)) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_i64(reader: &mut (impl Read + ?Sized)) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn read_f64(reader: &mut (impl Read + ?Sized)) -> Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

pub fn read_bytes(reader: &mut (impl Read + ?Sized), len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

// --- Primitive writers ---

pub fn write_u8(writer: &mut (impl Write + ?Sized), val: u8) -> Result<()> {
    writer.write_all(&[val])?;
    Ok(())
}

pub fn write_u16(writer: &mut (impl Write + ?Sized), val: u16) -> Result<()> {
    writer.write_all(&val.to_le_bytes())?;
    Ok(())
}

pub fn write_u32(writer: &mut (impl Write + ?Sized), val: u32) -> Result<()> {
    writer.write_all(&val.to_le_bytes())?;
    Ok(())
}

pub fn write_u64(writer: &mut (impl Write + ?Sized), val: u64) -> Result<()> {
    writer.write_all(&val.to_le_bytes())?;
    Ok(())
}

pub fn write_i64(writer: &mut (impl Write + ?Sized), val: i64) -> Result<()> {
    writer.write_all(&val.to_le_bytes())?;
    Ok(())
}

pub fn write_f64(writer: &mut (impl Write + ?Sized), val: f64) -> Result<()> {
    writer.write_all(&val.to_le_bytes())?;
    Ok(())
}

/// Write a length-prefixed string: 8-byte LE length + raw bytes.
pub fn write_string(writer: &mut (impl Write + ?Sized), s: &str) -> Result<()> {
    write_u64(writer, s.len() as u64)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

pub fn read_string(reader: &mut (impl Read + ?Sized)) -> Result<String> {
    let len = read_u64(reader)? as usize;
    let bytes = read_bytes(reader, len)?;
    String::from_utf8(bytes)
        .map_err(|e| XFrameError::Parse(format!("invalid UTF-8 in archive string: {}", e)))
}

/// Write a length-prefixed byte buffer.
pub fn write_blob(writer: &mut (impl Write + ?Sized), bytes: &[u8]) -> Result<()> {
    write_u64(writer, bytes.len() as u64)?;
    writer.write_all(bytes)?;
    Ok(())
}

pub fn read_blob(reader: &mut (impl Read + ?Sized)) -> Result<Vec<u8>> {
    let len = read_u64(reader)? as usize;
    read_bytes(reader, len)
}

/// Write a length-prefixed f64 vector.
pub fn write_vec_f64(writer: &mut (impl Write + ?Sized), v: &[f64]) -> Result<()> {
    write_u64(writer, v.len() as u64)?;
    for &val in v {
        write_f64(writer, val)?;
    }
    Ok(())
}

pub fn read_vec_f64(reader: &mut (impl Read + ?Sized)) -> Result<Vec<f64>> {
    let len = read_u64(reader)? as usize;
    let mut v = Vec::with_capacity(len);
    for _ in 0..len {
        v.push(read_f64(reader)?);
    }
    Ok(v)
}

fn write_vec_usize(writer: &mut (impl Write + ?Sized), v: &[usize]) -> Result<()> {
    write_u64(writer, v.len() as u64)?;
    for &val in v {
        write_u64(writer, val as u64)?;
    }
    Ok(())
}

fn read_vec_usize(reader: &mut (impl Read + ?Sized)) -> Result<Vec<usize>> {
    let len = read_u64(reader)? as usize;
    let mut v = Vec::with_capacity(len);
    for _ in 0..len {
        v.push(read_u64(reader)? as usize);
    }
    Ok(v)
}

/// Serialize a tagged value.
pub fn write_value(writer: &mut (impl Write + ?Sized), val: &Value) -> Result<()> {
    write_u8(writer, VALUE_TAG_OFFSET + val.kind() as u8)?;
    write_value_body(writer, val)
}

/// Serialize a value's payload without its tag. The reader must know the
/// kind from elsewhere (homogeneous block headers do).
pub fn write_value_body(writer: &mut (impl Write + ?Sized), val: &Value) -> Result<()> {
    match val {
        Value::Integer(v) => write_i64(writer, *v),
        Value::Float(v) => write_f64(writer, *v),
        Value::String(s) => write_string(writer, s),
        Value::Vector(v) => write_vec_f64(writer, v),
        Value::List(l) => {
            write_u64(writer, l.len() as u64)?;
            for v in l.iter() {
                write_value(writer, v)?;
            }
            Ok(())
        }
        Value::Dict(d) => {
            write_u64(writer, d.len() as u64)?;
            for (k, v) in d.iter() {
                write_value(writer, k)?;
                write_value(writer, v)?;
            }
            Ok(())
        }
        Value::DateTime(dt) => {
            write_i64(writer, dt.posix_timestamp)?;
            write_u8(writer, dt.tz_offset_quarter_hours as u8)?;
            write_u32(writer, dt.microsecond)
        }
        // Compacted so user-visible stride order survives the round-trip.
        Value::NdArray(nd) => {
            let packed = nd.compact();
            write_vec_usize(writer, packed.shape())?;
            write_vec_usize(writer, packed.stride())?;
            write_vec_f64(writer, packed.elements())
        }
        Value::Undefined => Ok(()),
    }
}

/// Deserialize a tagged value.
pub fn read_value(reader: &mut (impl Read + ?Sized)) -> Result<Value> {
    let tag = read_u8(reader)?;
    let kind = ValueKind::try_from(tag.wrapping_sub(VALUE_TAG_OFFSET))?;
    read_value_body(reader, kind)
}

/// Deserialize the payload of a value whose tag was read elsewhere.
pub fn read_value_body(reader: &mut (impl Read + ?Sized), kind: ValueKind) -> Result<Value> {
    match kind {
        ValueKind::Integer => Ok(Value::Integer(read_i64(reader)?)),
        ValueKind::Float => Ok(Value::Float(read_f64(reader)?)),
        ValueKind::String => Ok(Value::String(Arc::from(read_string(reader)?))),
        ValueKind::Vector => Ok(Value::Vector(Arc::from(read_vec_f64(reader)?))),
        ValueKind::List => {
            let len = read_u64(reader)? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(read_value(reader)?);
            }
            Ok(Value::List(Arc::from(items)))
        }
        ValueKind::Dict => {
            let len = read_u64(reader)? as usize;
            let mut pairs = Vec::with_capacity(len);
            for _ in 0..len {
                let k = read_value(reader)?;
                let v = read_value(reader)?;
                pairs.push((k, v));
            }
            Ok(Value::Dict(Arc::from(pairs)))
        }
        ValueKind::DateTime => {
            let posix_timestamp = read_i64(reader)?;
            let tz_offset_quarter_hours = read_u8(reader)? as i8;
            let microsecond = read_u32(reader)?;
            Ok(Value::DateTime(DateTimeValue {
                posix_timestamp,
                tz_offset_quarter_hours,
                microsecond,
            }))
        }
        ValueKind::NdArray => {
            let shape = read_vec_usize(reader)?;
            let stride = read_vec_usize(reader)?;
            let elements = read_vec_f64(reader)?;
            Ok(Value::NdArray(NdArray::new(
                Arc::from(elements),
                shape,
                stride,
                0,
            )?))
        }
        ValueKind::Undefined => Ok(Value::Undefined),
    }
}

/// Serialize a full row.
pub fn write_row(writer: &mut (impl Write + ?Sized), row: &[Value]) -> Result<()> {
    write_u64(writer, row.len() as u64)?;
    for v in row {
        write_value(writer, v)?;
    }
    Ok(())
}

/// Deserialize a full row.
pub fn read_row(reader: &mut (impl Read + ?Sized)) -> Result<Vec<Value>> {
    let len = read_u64(reader)? as usize;
    let mut row = Vec::with_capacity(len);
    for _ in 0..len {
        row.push(read_value(reader)?);
    }
    Ok(row)
}
