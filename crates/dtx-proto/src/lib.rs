//! Wire framing and object-graph codec for the DTX instruments RPC protocol.
//!
//! This crate is pure codec: it never touches a socket. It parses and builds
//! the three nested layers of a DTX message —
//!
//! - [`header`]: the fixed 32-byte frame header that identifies a message and
//!   its position in a fragment sequence.
//! - [`payload`] and [`aux`]: the 16-byte payload header, and the tagged
//!   auxiliary-argument list that rides alongside a selector or return value.
//! - [`archive`]: the binary-plist-based keyed-archive object graph carried
//!   inside a payload or an auxiliary `OBJECT` entry.
//!
//! Fragment reassembly and everything involving a live connection belongs to
//! `dtx-core`, which depends on this crate for the structures above.

pub mod archive;
pub mod aux;
pub mod error;
pub mod header;
pub mod payload;

pub use archive::{ClassRegistry, Value};
pub use aux::AuxEntry;
pub use error::{ProtocolError, Result};
pub use header::FrameHeader;
pub use payload::{DecodedPayload, PayloadHeader};
