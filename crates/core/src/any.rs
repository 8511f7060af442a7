//! Tagged binary encoding for dynamic values.
//!
//! Content payloads (Any, Embed, Format values, subdocument options)
//! are stored as `serde_json::Value` in memory and serialized with a
//! descending tag byte per variant. Floats are big-endian.

use serde_json::{Map, Value};
use ydelta_lib0::varint::{
    read_var_int, read_var_string, read_var_uint, write_var_int, write_var_string, write_var_uint,
    ReadError,
};

const TAG_UNDEFINED: u8 = 127;
const TAG_NULL: u8 = 126;
const TAG_INTEGER: u8 = 125;
const TAG_FLOAT32: u8 = 124;
const TAG_FLOAT64: u8 = 123;
const TAG_BIGINT: u8 = 122;
const TAG_FALSE: u8 = 121;
const TAG_TRUE: u8 = 120;
const TAG_STRING: u8 = 119;
const TAG_OBJECT: u8 = 118;
const TAG_ARRAY: u8 = 117;
const TAG_BYTES: u8 = 116;

/// Largest magnitude written through the integer tag; bigger integers
/// take the bigint form.
const INTEGER_LIMIT: i64 = (1 << 31) - 1;

pub fn write_any(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if (-INTEGER_LIMIT..=INTEGER_LIMIT).contains(&i) {
                    out.push(TAG_INTEGER);
                    write_var_int(out, i, false);
                } else {
                    out.push(TAG_BIGINT);
                    out.extend_from_slice(&i.to_be_bytes());
                }
            } else if let Some(u) = n.as_u64() {
                out.push(TAG_BIGINT);
                out.extend_from_slice(&(u as i64).to_be_bytes());
            } else {
                out.push(TAG_FLOAT64);
                out.extend_from_slice(&n.as_f64().unwrap_or(0.0).to_be_bytes());
            }
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            write_var_string(out, s);
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            write_var_uint(out, items.len() as u64);
            for item in items {
                write_any(out, item);
            }
        }
        Value::Object(entries) => {
            out.push(TAG_OBJECT);
            write_var_uint(out, entries.len() as u64);
            for (key, item) in entries {
                write_var_string(out, key);
                write_any(out, item);
            }
        }
    }
}

pub fn read_any(data: &[u8], pos: &mut usize) -> Result<Value, ReadError> {
    let tag = *data.get(*pos).ok_or(ReadError::UnexpectedEof)?;
    *pos += 1;
    match tag {
        // Undefined collapses to null; the distinction has no
        // representation in serde_json.
        TAG_UNDEFINED | TAG_NULL => Ok(Value::Null),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_INTEGER => Ok(Value::from(read_var_int(data, pos)?)),
        TAG_FLOAT32 => {
            let raw = take(data, pos, 4)?;
            let bits = [raw[0], raw[1], raw[2], raw[3]];
            Ok(float_value(f32::from_be_bytes(bits) as f64))
        }
        TAG_FLOAT64 => {
            let raw = take(data, pos, 8)?;
            let mut bits = [0u8; 8];
            bits.copy_from_slice(raw);
            Ok(float_value(f64::from_be_bytes(bits)))
        }
        TAG_BIGINT => {
            let raw = take(data, pos, 8)?;
            let mut bits = [0u8; 8];
            bits.copy_from_slice(raw);
            Ok(Value::from(i64::from_be_bytes(bits)))
        }
        TAG_STRING => Ok(Value::String(read_var_string(data, pos)?)),
        TAG_OBJECT => {
            let len = read_var_uint(data, pos)?;
            let mut entries = Map::new();
            for _ in 0..len {
                let key = read_var_string(data, pos)?;
                let item = read_any(data, pos)?;
                entries.insert(key, item);
            }
            Ok(Value::Object(entries))
        }
        TAG_ARRAY => {
            let len = read_var_uint(data, pos)?;
            let mut items = Vec::new();
            for _ in 0..len {
                items.push(read_any(data, pos)?);
            }
            Ok(Value::Array(items))
        }
        TAG_BYTES => {
            let len = read_var_uint(data, pos)? as usize;
            let raw = take(data, pos, len)?;
            Ok(Value::Array(raw.iter().map(|b| Value::from(*b)).collect()))
        }
        _ => Err(ReadError::UnexpectedEof),
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], ReadError> {
    let end = pos.checked_add(len).ok_or(ReadError::Overflow)?;
    let slice = data.get(*pos..end).ok_or(ReadError::UnexpectedEof)?;
    *pos = end;
    Ok(slice)
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(v: &Value) -> Value {
        let mut buf = Vec::new();
        write_any(&mut buf, v);
        let mut pos = 0;
        let out = read_any(&buf, &mut pos).expect("read_any must succeed");
        assert_eq!(pos, buf.len());
        out
    }

    #[test]
    fn scalars_round_trip() {
        for v in [
            json!(null),
            json!(true),
            json!(false),
            json!(0),
            json!(-1),
            json!(42),
            json!(i64::from(i32::MAX)),
            json!(i64::from(i32::MAX) + 1),
            json!(-9007199254740991i64),
            json!(1.5),
            json!("hello"),
            json!(""),
        ] {
            assert_eq!(round_trip(&v), v);
        }
    }

    #[test]
    fn containers_round_trip() {
        let v = json!({
            "list": [1, "two", null, {"deep": [true, 2.25]}],
            "empty": {},
            "s": "überschrift"
        });
        assert_eq!(round_trip(&v), v);
    }

    #[test]
    fn truncated_input_fails() {
        let mut buf = Vec::new();
        write_any(&mut buf, &json!({"k": [1, 2, 3]}));
        let mut pos = 0;
        assert!(read_any(&buf[..buf.len() - 2], &mut pos).is_err());
    }
}
