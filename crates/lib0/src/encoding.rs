//! Column stream encoders.
//!
//! Each encoder buffers a run-length state and owns its output buffer.
//! `to_bytes` flushes any pending run and consumes the encoder, so a
//! column can only be finalized once.

use crate::varint::{write_var_int, write_var_string, write_var_uint};

/// Basic byte run-length encoder.
///
/// Emits the value byte followed by a `count - 1` varuint once the run
/// ends. The final run's count is never written; the decoder repeats
/// the last byte when the stream is exhausted.
#[derive(Debug, Default)]
pub struct RleEncoder {
    buf: Vec<u8>,
    state: Option<u8>,
    count: u64,
}

impl RleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: u8) {
        if self.state == Some(value) {
            self.count += 1;
        } else {
            if self.count > 0 {
                write_var_uint(&mut self.buf, self.count - 1);
            }
            self.buf.push(value);
            self.count = 1;
            self.state = Some(value);
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Optimized run-length encoder for unsigned integers.
///
/// A lone value is written as a positive signed varint. A run is
/// written as the negated value (negative zero included) followed by a
/// `count - 2` varuint.
#[derive(Debug, Default)]
pub struct UintOptRleEncoder {
    buf: Vec<u8>,
    state: u64,
    count: u64,
}

impl UintOptRleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: u64) {
        if self.state == value && self.count > 0 {
            self.count += 1;
        } else {
            self.flush_run();
            self.count = 1;
            self.state = value;
        }
    }

    fn flush_run(&mut self) {
        if self.count > 0 {
            if self.count == 1 {
                write_var_int(&mut self.buf, self.state as i64, false);
            } else {
                write_var_int(&mut self.buf, -(self.state as i64), self.state == 0);
                write_var_uint(&mut self.buf, self.count - 2);
            }
        }
    }

    pub fn to_bytes(mut self) -> Vec<u8> {
        self.flush_run();
        self.buf
    }
}

/// Run-length encoder for increasing unsigned sequences.
///
/// Consecutive values `n, n+1, n+2, ...` form a run. The wire format
/// matches [`UintOptRleEncoder`]: a negated start value marks a run
/// and is followed by a `count - 2` varuint.
#[derive(Debug, Default)]
pub struct IncUintOptRleEncoder {
    buf: Vec<u8>,
    state: u64,
    count: u64,
}

impl IncUintOptRleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: u64) {
        if self.state + self.count == value && self.count > 0 {
            self.count += 1;
        } else {
            self.flush_run();
            self.count = 1;
            self.state = value;
        }
    }

    fn flush_run(&mut self) {
        if self.count > 0 {
            if self.count == 1 {
                write_var_int(&mut self.buf, self.state as i64, false);
            } else {
                write_var_int(&mut self.buf, -(self.state as i64), self.state == 0);
                write_var_uint(&mut self.buf, self.count - 2);
            }
        }
    }

    pub fn to_bytes(mut self) -> Vec<u8> {
        self.flush_run();
        self.buf
    }
}

/// Delta encoder. Writes `value - previous` as a signed varint.
#[derive(Debug)]
pub struct IntDiffEncoder {
    buf: Vec<u8>,
    state: i64,
}

impl IntDiffEncoder {
    pub fn new(start: i64) -> Self {
        Self {
            buf: Vec::new(),
            state: start,
        }
    }

    pub fn write(&mut self, value: i64) {
        write_var_int(&mut self.buf, value - self.state, false);
        self.state = value;
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Run-length delta encoder.
///
/// A repeated value extends the current run. On change the previous
/// run's `count - 1` varuint is written, then the new delta. As with
/// [`RleEncoder`], the final count is omitted.
#[derive(Debug)]
pub struct RleIntDiffEncoder {
    buf: Vec<u8>,
    state: i64,
    count: u64,
}

impl RleIntDiffEncoder {
    pub fn new(start: i64) -> Self {
        Self {
            buf: Vec::new(),
            state: start,
            count: 0,
        }
    }

    pub fn write(&mut self, value: i64) {
        if self.state == value && self.count > 0 {
            self.count += 1;
        } else {
            if self.count > 0 {
                write_var_uint(&mut self.buf, self.count - 1);
            }
            write_var_int(&mut self.buf, value - self.state, false);
            self.count = 1;
            self.state = value;
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Delta encoder with run-length compression of repeated deltas.
///
/// A run flushes as `sign(diff) * ((|diff| << 1) | has_count)` where
/// `has_count` marks a following `count - 2` varuint. Shifting the
/// diff left keeps its sign available even when the diff is zero.
#[derive(Debug, Default)]
pub struct IntDiffOptRleEncoder {
    buf: Vec<u8>,
    state: i64,
    diff: i64,
    count: u64,
}

impl IntDiffOptRleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: i64) {
        if self.diff == value - self.state && self.count > 0 {
            self.state = value;
            self.count += 1;
        } else {
            self.flush_run();
            self.count = 1;
            self.diff = value - self.state;
            self.state = value;
        }
    }

    fn flush_run(&mut self) {
        if self.count > 0 {
            let has_count = if self.count == 1 { 0 } else { 1 };
            let encoded = if self.diff < 0 {
                -(((-self.diff) << 1) | has_count)
            } else {
                (self.diff << 1) | has_count
            };
            write_var_int(&mut self.buf, encoded, false);
            if self.count > 1 {
                write_var_uint(&mut self.buf, self.count - 2);
            }
        }
    }

    pub fn to_bytes(mut self) -> Vec<u8> {
        self.flush_run();
        self.buf
    }
}

/// String encoder with a length side-channel.
///
/// All strings are appended to one UTF-8 body; lengths are tracked in
/// UTF-16 code units through a [`UintOptRleEncoder`]. The finalized
/// column is the var-string body followed by the raw length stream.
#[derive(Debug, Default)]
pub struct StringEncoder {
    body: String,
    lengths: UintOptRleEncoder,
}

impl StringEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: &str) {
        self.body.push_str(value);
        self.lengths.write(value.encode_utf16().count() as u64);
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 8);
        write_var_string(&mut out, &self.body);
        out.extend_from_slice(&self.lengths.to_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rle_omits_the_final_count() {
        let mut enc = RleEncoder::new();
        for _ in 0..5 {
            enc.write(7);
        }
        // A single run is just the value byte.
        assert_eq!(enc.to_bytes(), vec![7]);

        let mut enc = RleEncoder::new();
        enc.write(1);
        enc.write(1);
        enc.write(2);
        // count-1 of the first run precedes the second value byte.
        assert_eq!(enc.to_bytes(), vec![1, 1, 2]);
    }

    #[test]
    fn uint_opt_rle_single_value_stays_positive() {
        let mut enc = UintOptRleEncoder::new();
        enc.write(5);
        assert_eq!(enc.to_bytes(), vec![5]);
    }

    #[test]
    fn uint_opt_rle_run_negates_the_value() {
        let mut enc = UintOptRleEncoder::new();
        enc.write(5);
        enc.write(5);
        enc.write(5);
        // -5 as signed varint, then count-2.
        assert_eq!(enc.to_bytes(), vec![0x45, 1]);
    }

    #[test]
    fn uint_opt_rle_zero_run_uses_negative_zero() {
        let mut enc = UintOptRleEncoder::new();
        enc.write(0);
        enc.write(0);
        // Sign bit set on a zero magnitude, then count-2.
        assert_eq!(enc.to_bytes(), vec![0x40, 0]);
    }

    #[test]
    fn int_diff_writes_deltas() {
        let mut enc = IntDiffEncoder::new(0);
        enc.write(3);
        enc.write(5);
        enc.write(1);
        // Deltas 3, 2, -4.
        assert_eq!(enc.to_bytes(), vec![3, 2, 0x44]);
    }

    #[test]
    fn string_encoder_counts_utf16_units() {
        let mut enc = StringEncoder::new();
        enc.write("a🙂");
        let bytes = enc.to_bytes();
        // Body is 5 UTF-8 bytes; the surrogate pair counts as 2 units.
        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[1..6], "a🙂".as_bytes());
        assert_eq!(bytes[6], 3);
    }
}
