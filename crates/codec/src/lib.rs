//! Binary codecs for the page store: order-preserving compressed integers
//! and floats, bitset packing, heterogeneous tuples, and fixed-width 48-bit
//! integers. Pure functions on byte slices — no I/O, no allocation beyond
//! what the caller asks for.

pub mod bitset;
pub mod compressed_float;
pub mod compressed_uint;
pub mod float39;
pub mod tuple;
pub mod uint48;

pub use bitset::{bitset32_len, read_bitset32, write_bitset32};
pub use compressed_float::{compressed_f64_len, read_compressed_f64, write_compressed_f64};
pub use compressed_uint::{
    compressed_u32_len, push_compressed_u32, read_compressed_u32, write_compressed_u32,
};
pub use float39::{read_float39, write_float39, Float39, FLOAT39_LEN};
pub use tuple::{read_tuple, tuple_len, write_tuple, TupleType, TupleValue};
pub use uint48::{read_uint48, write_uint48, UINT48_LEN};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("need {needed} bytes but only {available} available")]
    InsufficientSpace { needed: usize, available: usize },

    #[error("offset {offset} out of bounds for buffer of {len} bytes")]
    OffsetOutOfBounds { offset: usize, len: usize },

    #[error("invalid encoding: {0}")]
    InvalidEncoding(&'static str),

    #[error("value {0} does not fit into 48 bits")]
    NotUint48(u64),
}

/// Bounds check shared by the fixed-size writers.
pub(crate) fn check_space(buf: &[u8], offset: usize, needed: usize) -> Result<(), CodecError> {
    let available = buf.len().saturating_sub(offset);
    if available < needed {
        return Err(CodecError::InsufficientSpace { needed, available });
    }
    Ok(())
}
