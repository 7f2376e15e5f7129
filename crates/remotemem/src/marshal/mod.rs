//! Conversion between raw byte buffers and typed values.

pub mod layout;
pub mod text;

pub use layout::{
    array_byte_len, check_size, decode_array, decode_field, encode_array, encode_field,
    NativeValue,
};
pub use text::TextEncoding;
