//! A small hand-rolled bencode codec: a `Value` tree plus decode/encode
//! free functions. Used by torrent metainfo parsing and tracker HTTP
//! response parsing.

mod decode;
mod encode;
mod value;

pub use decode::{decode, find_top_level_dict_value_span, DecodeError};
pub use encode::encode;
pub use value::Value;
