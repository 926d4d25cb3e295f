pub mod api;
pub mod codec;
pub mod error;
pub mod naming;
pub mod type_tags;
pub mod value;

pub use api::*;
pub use error::{RdbError, RdbResult};
pub use type_tags::{decode_type_map, encode_type_map, TypeMap};
pub use value::*;
