//! Binary stream primitives for the ydelta update format.
//!
//! The update message compresses its parallel struct columns with a
//! small family of specialized encoders (run-length, delta, and
//! combinations of both) built on two varint flavors:
//!
//! - unsigned: 7 payload bits per byte, bit 7 = continuation;
//! - signed: the first byte carries 6 payload bits, bit 6 = sign and
//!   bit 7 = continuation; later bytes are plain 7+continuation.
//!
//! Every decoder reads from a `&[u8]` with an explicit cursor and is
//! fallible; encoders own a `Vec<u8>` and are infallible. A column is
//! always consumed by the decoder matching its encoder.

pub mod decoding;
pub mod encoding;
pub mod varint;

pub use decoding::{
    IncUintOptRleDecoder, IntDiffDecoder, IntDiffOptRleDecoder, RleDecoder, RleIntDiffDecoder,
    StringDecoder, UintOptRleDecoder,
};
pub use encoding::{
    IncUintOptRleEncoder, IntDiffEncoder, IntDiffOptRleEncoder, RleEncoder, RleIntDiffEncoder,
    StringEncoder, UintOptRleEncoder,
};
pub use varint::ReadError;
