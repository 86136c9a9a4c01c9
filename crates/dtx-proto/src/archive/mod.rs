//! Keyed-archive object codec: a binary-plist-based graph format used for
//! selectors, return values, and auxiliary object arguments.

mod bplist;
mod codec;
mod registry;
mod value;

pub use codec::{decode, encode};
pub use registry::{ClassRegistry, Decoder};
pub use value::Value;
