//! Byte encodings: memcmp-ordered primary keys, escaped binary fields, and
//! standalone cells for predicate operands.

pub mod binary;
pub mod cell;
pub mod key;

pub use cell::{decode_cell, encode_cell};
pub use key::{
    decode_row_key, encode_key_column, encode_key_prefix, encode_row_key, prefix_successor,
    successor,
};
