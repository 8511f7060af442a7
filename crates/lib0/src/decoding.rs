//! Column stream decoders.
//!
//! Each decoder borrows the column slice it was handed and keeps an
//! internal cursor. Reads are fallible; a malformed column surfaces as
//! a [`ReadError`] instead of garbage values.

use crate::varint::{read_var_int, read_var_int_parts, read_var_string, read_var_uint, ReadError};

/// Sentinel for a run that repeats until the caller stops reading.
const RUN_FOREVER: u64 = u64::MAX;

/// Decoder for [`RleEncoder`](crate::encoding::RleEncoder) output.
///
/// When the slice is exhausted after a value byte, that byte repeats
/// forever. The caller is responsible for reading the right number of
/// elements.
#[derive(Debug)]
pub struct RleDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    state: u8,
    count: u64,
}

impl<'a> RleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            state: 0,
            count: 0,
        }
    }

    pub fn read(&mut self) -> Result<u8, ReadError> {
        if self.count == 0 {
            self.state = *self.data.get(self.pos).ok_or(ReadError::UnexpectedEof)?;
            self.pos += 1;
            if self.pos < self.data.len() {
                // See the encoder for why the stored count is one short.
                self.count = read_var_uint(self.data, &mut self.pos)?
                    .checked_add(1)
                    .ok_or(ReadError::Overflow)?;
            } else {
                self.count = RUN_FOREVER;
            }
        }
        self.count -= 1;
        Ok(self.state)
    }
}

/// Decoder for [`UintOptRleEncoder`](crate::encoding::UintOptRleEncoder) output.
#[derive(Debug)]
pub struct UintOptRleDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    state: u64,
    count: u64,
}

impl<'a> UintOptRleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            state: 0,
            count: 0,
        }
    }

    pub fn read(&mut self) -> Result<u64, ReadError> {
        if self.count == 0 {
            // A negative value (negative zero included) marks a run.
            let (magnitude, negative) = read_var_int_parts(self.data, &mut self.pos)?;
            self.state = magnitude;
            if negative {
                self.count = read_var_uint(self.data, &mut self.pos)?
                    .checked_add(2)
                    .ok_or(ReadError::Overflow)?;
            } else {
                self.count = 1;
            }
        }
        self.count -= 1;
        Ok(self.state)
    }
}

/// Decoder for [`IncUintOptRleEncoder`](crate::encoding::IncUintOptRleEncoder) output.
///
/// Identical wire format to [`UintOptRleDecoder`], but the state is
/// incremented after every read so a run yields `n, n+1, n+2, ...`.
#[derive(Debug)]
pub struct IncUintOptRleDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    state: u64,
    count: u64,
}

impl<'a> IncUintOptRleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            state: 0,
            count: 0,
        }
    }

    pub fn read(&mut self) -> Result<u64, ReadError> {
        if self.count == 0 {
            let (magnitude, negative) = read_var_int_parts(self.data, &mut self.pos)?;
            self.state = magnitude;
            if negative {
                self.count = read_var_uint(self.data, &mut self.pos)?
                    .checked_add(2)
                    .ok_or(ReadError::Overflow)?;
            } else {
                self.count = 1;
            }
        }
        self.count -= 1;
        let result = self.state;
        self.state = self.state.checked_add(1).ok_or(ReadError::Overflow)?;
        Ok(result)
    }
}

/// Decoder for [`IntDiffEncoder`](crate::encoding::IntDiffEncoder) output.
#[derive(Debug)]
pub struct IntDiffDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    state: i64,
}

impl<'a> IntDiffDecoder<'a> {
    pub fn new(data: &'a [u8], start: i64) -> Self {
        Self {
            data,
            pos: 0,
            state: start,
        }
    }

    pub fn read(&mut self) -> Result<i64, ReadError> {
        let diff = read_var_int(self.data, &mut self.pos)?;
        self.state = self.state.checked_add(diff).ok_or(ReadError::Overflow)?;
        Ok(self.state)
    }
}

/// Decoder for [`RleIntDiffEncoder`](crate::encoding::RleIntDiffEncoder) output.
#[derive(Debug)]
pub struct RleIntDiffDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    state: i64,
    count: u64,
}

impl<'a> RleIntDiffDecoder<'a> {
    pub fn new(data: &'a [u8], start: i64) -> Self {
        Self {
            data,
            pos: 0,
            state: start,
            count: 0,
        }
    }

    pub fn read(&mut self) -> Result<i64, ReadError> {
        if self.count == 0 {
            let diff = read_var_int(self.data, &mut self.pos)?;
            self.state = self.state.checked_add(diff).ok_or(ReadError::Overflow)?;
            if self.pos < self.data.len() {
                self.count = read_var_uint(self.data, &mut self.pos)?
                    .checked_add(1)
                    .ok_or(ReadError::Overflow)?;
            } else {
                self.count = RUN_FOREVER;
            }
        }
        self.count -= 1;
        Ok(self.state)
    }
}

/// Decoder for [`IntDiffOptRleEncoder`](crate::encoding::IntDiffOptRleEncoder) output.
#[derive(Debug)]
pub struct IntDiffOptRleDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    state: i64,
    diff: i64,
    count: u64,
}

impl<'a> IntDiffOptRleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            state: 0,
            diff: 0,
            count: 0,
        }
    }

    pub fn read(&mut self) -> Result<i64, ReadError> {
        if self.count == 0 {
            let (magnitude, negative) = read_var_int_parts(self.data, &mut self.pos)?;
            // The low bit survives negation and flags a trailing count.
            let has_count = magnitude & 1 != 0;
            let diff = (magnitude >> 1) as i64;
            self.diff = if negative { -diff } else { diff };
            if has_count {
                self.count = read_var_uint(self.data, &mut self.pos)?
                    .checked_add(2)
                    .ok_or(ReadError::Overflow)?;
            } else {
                self.count = 1;
            }
        }
        self.state = self.state.checked_add(self.diff).ok_or(ReadError::Overflow)?;
        self.count -= 1;
        Ok(self.state)
    }
}

/// Decoder for [`StringEncoder`](crate::encoding::StringEncoder) output.
///
/// The shared UTF-8 body is read up front; individual reads slice it
/// by lengths expressed in UTF-16 code units.
#[derive(Debug)]
pub struct StringDecoder<'a> {
    body: &'a str,
    lengths: UintOptRleDecoder<'a>,
}

impl<'a> StringDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, ReadError> {
        let mut pos = 0;
        let len = read_var_uint(data, &mut pos)? as usize;
        let end = pos.checked_add(len).ok_or(ReadError::Overflow)?;
        let raw = data.get(pos..end).ok_or(ReadError::UnexpectedEof)?;
        let body = std::str::from_utf8(raw).map_err(|_| ReadError::InvalidUtf8)?;
        Ok(Self {
            body,
            lengths: UintOptRleDecoder::new(&data[end..]),
        })
    }

    pub fn read(&mut self) -> Result<&'a str, ReadError> {
        let units = self.lengths.read()?;
        if units == 0 {
            return Ok("");
        }
        let mut remaining = units;
        let mut byte_len = 0;
        for ch in self.body.chars() {
            let w = ch.len_utf16() as u64;
            if remaining < w {
                return Err(ReadError::UnexpectedEof);
            }
            remaining -= w;
            byte_len += ch.len_utf8();
            if remaining == 0 {
                break;
            }
        }
        if remaining > 0 {
            return Err(ReadError::UnexpectedEof);
        }
        let (head, rest) = self.body.split_at(byte_len);
        self.body = rest;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{
        IncUintOptRleEncoder, IntDiffEncoder, IntDiffOptRleEncoder, RleEncoder, RleIntDiffEncoder,
        StringEncoder, UintOptRleEncoder,
    };
    use proptest::prelude::*;

    #[test]
    fn rle_repeats_the_last_value_when_exhausted() {
        let mut enc = RleEncoder::new();
        enc.write(3);
        enc.write(3);
        let bytes = enc.to_bytes();
        let mut dec = RleDecoder::new(&bytes);
        // The final count is absent, so reads keep succeeding.
        for _ in 0..10 {
            assert_eq!(dec.read(), Ok(3));
        }
    }

    #[test]
    fn uint_opt_rle_round_trip_with_zero_runs() {
        let values: [u64; 9] = [0, 0, 0, 5, 5, 1, 0, 7, 7];
        let mut enc = UintOptRleEncoder::new();
        for &v in &values {
            enc.write(v);
        }
        let bytes = enc.to_bytes();
        let mut dec = UintOptRleDecoder::new(&bytes);
        for &v in &values {
            assert_eq!(dec.read(), Ok(v));
        }
    }

    #[test]
    fn inc_uint_opt_rle_round_trip() {
        let values: [u64; 8] = [0, 1, 2, 3, 10, 11, 5, 6];
        let mut enc = IncUintOptRleEncoder::new();
        for &v in &values {
            enc.write(v);
        }
        let bytes = enc.to_bytes();
        let mut dec = IncUintOptRleDecoder::new(&bytes);
        for &v in &values {
            assert_eq!(dec.read(), Ok(v));
        }
    }

    #[test]
    fn int_diff_opt_rle_round_trip_with_negative_deltas() {
        let values: [i64; 10] = [0, 10, 20, 30, 25, 20, 15, 15, 100, -4];
        let mut enc = IntDiffOptRleEncoder::new();
        for &v in &values {
            enc.write(v);
        }
        let bytes = enc.to_bytes();
        let mut dec = IntDiffOptRleDecoder::new(&bytes);
        for &v in &values {
            assert_eq!(dec.read(), Ok(v));
        }
    }

    #[test]
    fn rle_int_diff_round_trip() {
        let values: [i64; 7] = [1, 1, 1, 4, 4, 2, 2];
        let mut enc = RleIntDiffEncoder::new(0);
        for &v in &values {
            enc.write(v);
        }
        let bytes = enc.to_bytes();
        let mut dec = RleIntDiffDecoder::new(&bytes, 0);
        for &v in &values {
            assert_eq!(dec.read(), Ok(v));
        }
    }

    #[test]
    fn string_decoder_slices_by_utf16_units() {
        let parts = ["hello", "", "wörld", "🙂", "ab"];
        let mut enc = StringEncoder::new();
        for p in parts {
            enc.write(p);
        }
        let bytes = enc.to_bytes();
        let mut dec = StringDecoder::new(&bytes).unwrap();
        for p in parts {
            assert_eq!(dec.read(), Ok(p));
        }
    }

    #[test]
    fn oversized_run_counts_are_rejected() {
        // A count varint of u64::MAX would wrap when the implicit
        // offset is added back.
        let mut bytes = Vec::new();
        crate::varint::write_var_int(&mut bytes, -7, false);
        bytes.extend_from_slice(&[0xff; 9]);
        bytes.push(0x01);
        let mut dec = UintOptRleDecoder::new(&bytes);
        assert_eq!(dec.read(), Err(ReadError::Overflow));

        let mut bytes = vec![0x03];
        bytes.extend_from_slice(&[0xff; 9]);
        bytes.push(0x01);
        let mut dec = RleDecoder::new(&bytes);
        assert_eq!(dec.read(), Err(ReadError::Overflow));
    }

    fn check_uint_column(values: &[u64]) {
        let mut enc = UintOptRleEncoder::new();
        for &v in values {
            enc.write(v);
        }
        let bytes = enc.to_bytes();
        let mut dec = UintOptRleDecoder::new(&bytes);
        for &v in values {
            assert_eq!(dec.read(), Ok(v));
        }
    }

    proptest! {
        #[test]
        fn uint_opt_rle_round_trips(values in proptest::collection::vec(0u64..1 << 40, 0..200)) {
            check_uint_column(&values);
        }

        #[test]
        fn uint_opt_rle_round_trips_runs(
            runs in proptest::collection::vec((0u64..16, 1usize..12), 0..40)
        ) {
            let mut values = Vec::new();
            for (v, n) in runs {
                values.extend(std::iter::repeat(v).take(n));
            }
            check_uint_column(&values);
        }

        #[test]
        fn int_diff_round_trips(values in proptest::collection::vec(-(1i64 << 40)..1 << 40, 1..200)) {
            let mut enc = IntDiffEncoder::new(0);
            for &v in &values {
                enc.write(v);
            }
            let bytes = enc.to_bytes();
            let mut dec = IntDiffDecoder::new(&bytes, 0);
            for &v in &values {
                prop_assert_eq!(dec.read(), Ok(v));
            }
        }

        #[test]
        fn int_diff_opt_rle_round_trips(values in proptest::collection::vec(-(1i64 << 30)..1 << 30, 1..200)) {
            let mut enc = IntDiffOptRleEncoder::new();
            for &v in &values {
                enc.write(v);
            }
            let bytes = enc.to_bytes();
            let mut dec = IntDiffOptRleDecoder::new(&bytes);
            for &v in &values {
                prop_assert_eq!(dec.read(), Ok(v));
            }
        }

        #[test]
        fn string_columns_round_trip(parts in proptest::collection::vec(".{0,20}", 0..40)) {
            let mut enc = StringEncoder::new();
            for p in &parts {
                enc.write(p);
            }
            let bytes = enc.to_bytes();
            let mut dec = StringDecoder::new(&bytes).unwrap();
            for p in &parts {
                prop_assert_eq!(dec.read(), Ok(p.as_str()));
            }
        }
    }
}
