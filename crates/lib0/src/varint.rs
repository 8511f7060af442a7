//! Variable-length integer, string and byte-array primitives.

use thiserror::Error;

/// Errors raised while reading from a binary stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint exceeds 64 bits")]
    Overflow,
    #[error("invalid utf-8 in string")]
    InvalidUtf8,
}

/// Writes an unsigned integer as a little-endian base-128 varint.
pub fn write_var_uint(out: &mut Vec<u8>, mut value: u64) {
    while value > 0x7f {
        out.push(0x80 | (value & 0x7f) as u8);
        value >>= 7;
    }
    out.push((value & 0x7f) as u8);
}

/// Reads an unsigned varint, advancing `pos` past the consumed bytes.
pub fn read_var_uint(data: &[u8], pos: &mut usize) -> Result<u64, ReadError> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let b = *data.get(*pos).ok_or(ReadError::UnexpectedEof)?;
        *pos += 1;
        result |= ((b & 0x7f) as u64)
            .checked_shl(shift)
            .filter(|_| shift < 64)
            .ok_or(ReadError::Overflow)?;
        if b & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Writes a signed varint.
///
/// The first byte packs 6 payload bits, the sign (bit 6) and the
/// continuation flag (bit 7). `treat_zero_as_negative` lets callers
/// emit a negative zero, which the run-length encoders use to mark a
/// zero-valued run.
pub fn write_var_int(out: &mut Vec<u8>, value: i64, treat_zero_as_negative: bool) {
    let negative = if value == 0 {
        treat_zero_as_negative
    } else {
        value < 0
    };
    let mut rest = value.unsigned_abs();

    let mut first = (rest & 0x3f) as u8;
    if negative {
        first |= 0x40;
    }
    rest >>= 6;
    if rest > 0 {
        first |= 0x80;
    }
    out.push(first);

    while rest > 0 {
        let mut b = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest > 0 {
            b |= 0x80;
        }
        out.push(b);
    }
}

/// Reads a signed varint as `(magnitude, negative)`.
///
/// The pair form preserves negative zero, which `read_var_int` cannot.
pub fn read_var_int_parts(data: &[u8], pos: &mut usize) -> Result<(u64, bool), ReadError> {
    let first = *data.get(*pos).ok_or(ReadError::UnexpectedEof)?;
    *pos += 1;
    let negative = first & 0x40 != 0;
    let mut result: u64 = (first & 0x3f) as u64;
    if first & 0x80 == 0 {
        return Ok((result, negative));
    }

    let mut shift: u32 = 6;
    loop {
        let b = *data.get(*pos).ok_or(ReadError::UnexpectedEof)?;
        *pos += 1;
        result |= ((b & 0x7f) as u64)
            .checked_shl(shift)
            .filter(|_| shift < 64)
            .ok_or(ReadError::Overflow)?;
        if b & 0x80 == 0 {
            return Ok((result, negative));
        }
        shift += 7;
    }
}

/// Reads a signed varint.
pub fn read_var_int(data: &[u8], pos: &mut usize) -> Result<i64, ReadError> {
    let (magnitude, negative) = read_var_int_parts(data, pos)?;
    let value = magnitude as i64;
    Ok(if negative { -value } else { value })
}

/// Writes a length-prefixed UTF-8 string.
pub fn write_var_string(out: &mut Vec<u8>, value: &str) {
    write_var_uint(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_var_string(data: &[u8], pos: &mut usize) -> Result<String, ReadError> {
    let bytes = read_var_bytes(data, pos)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ReadError::InvalidUtf8)
}

/// Writes a length-prefixed byte array.
pub fn write_var_bytes(out: &mut Vec<u8>, value: &[u8]) {
    write_var_uint(out, value.len() as u64);
    out.extend_from_slice(value);
}

/// Reads a length-prefixed byte array as a borrowed slice.
pub fn read_var_bytes<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8], ReadError> {
    let len = read_var_uint(data, pos)? as usize;
    let end = pos.checked_add(len).ok_or(ReadError::Overflow)?;
    let slice = data.get(*pos..end).ok_or(ReadError::UnexpectedEof)?;
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn var_uint_boundaries_round_trip() {
        for v in [
            0u64,
            1,
            127,
            128,
            16_383,
            16_384,
            u32::MAX as u64 - 1,
            u32::MAX as u64,
            u64::MAX,
        ] {
            let mut buf = Vec::new();
            write_var_uint(&mut buf, v);
            let mut pos = 0;
            assert_eq!(read_var_uint(&buf, &mut pos), Ok(v));
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn var_int_boundaries_round_trip() {
        for v in [
            0i64, 1, -1, 63, -63, 64, -64, 127, -127, 128, -128, 16_383, -16_383, 16_384, -16_384,
            i64::MAX, i64::MIN + 1,
        ] {
            let mut buf = Vec::new();
            write_var_int(&mut buf, v, false);
            let mut pos = 0;
            assert_eq!(read_var_int(&buf, &mut pos), Ok(v));
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn negative_zero_is_preserved_in_parts() {
        let mut buf = Vec::new();
        write_var_int(&mut buf, 0, true);
        let mut pos = 0;
        assert_eq!(read_var_int_parts(&buf, &mut pos), Ok((0, true)));

        let mut buf = Vec::new();
        write_var_int(&mut buf, 0, false);
        let mut pos = 0;
        assert_eq!(read_var_int_parts(&buf, &mut pos), Ok((0, false)));
    }

    #[test]
    fn var_string_round_trip() {
        for s in ["", "a", "key", "héllo wörld", "🙂🙂", "\u{fffd}"] {
            let mut buf = Vec::new();
            write_var_string(&mut buf, s);
            let mut pos = 0;
            assert_eq!(read_var_string(&buf, &mut pos).as_deref(), Ok(s));
        }
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut buf = Vec::new();
        write_var_uint(&mut buf, 300);
        let mut pos = 0;
        assert_eq!(
            read_var_uint(&buf[..1], &mut pos),
            Err(ReadError::UnexpectedEof)
        );

        let mut buf = Vec::new();
        write_var_string(&mut buf, "hello");
        let mut pos = 0;
        assert_eq!(
            read_var_string(&buf[..3], &mut pos),
            Err(ReadError::UnexpectedEof)
        );
    }

    proptest! {
        #[test]
        fn var_uint_round_trips(v in any::<u64>()) {
            let mut buf = Vec::new();
            write_var_uint(&mut buf, v);
            let mut pos = 0;
            prop_assert_eq!(read_var_uint(&buf, &mut pos), Ok(v));
            prop_assert_eq!(pos, buf.len());
        }

        #[test]
        fn var_int_round_trips(v in any::<i64>()) {
            prop_assume!(v != i64::MIN);
            let mut buf = Vec::new();
            write_var_int(&mut buf, v, false);
            let mut pos = 0;
            prop_assert_eq!(read_var_int(&buf, &mut pos), Ok(v));
        }

        #[test]
        fn var_bytes_round_trips(v in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut buf = Vec::new();
            write_var_bytes(&mut buf, &v);
            let mut pos = 0;
            prop_assert_eq!(read_var_bytes(&buf, &mut pos).map(|s| s.to_vec()), Ok(v));
        }
    }
}
