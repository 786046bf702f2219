//! Block payload encoding
//!
//! Interior samples of a block are stored as `(dt, dv)` pairs relative to
//! the previous absolute sample. Each delta is zig-zag mapped and written as
//! a little-endian base-128 varint, so small positive and negative steps
//! cost one byte each.

mod delta;
mod varint;

pub use delta::{DeltaDecoder, DeltaEncoder};
pub use varint::{
    encode_varint, from_zigzag, put_varint, to_zigzag, VarintReader, MAX_VARINT_LEN,
};
