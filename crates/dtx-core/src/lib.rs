//! Session, channel multiplexing, and domain bindings for the DTX
//! instruments RPC protocol.
//!
//! This crate consumes an already-authenticated, ordered byte stream (see
//! [`transport::Transport`]) and drives the protocol `dtx-proto` encodes:
//! capability handshake, lazy channel creation, and the typed domain
//! bindings in [`bindings`] built on top of [`session::Session`].

pub mod bindings;
pub mod channel;
pub mod error;
pub mod session;
pub mod transport;

pub use bindings::networking::{NetworkEvent, NetworkMonitor, SocketAddrRecord};
pub use bindings::sysmontap::SysmonTap;
pub use channel::{sanitize_selector, ChannelHandle, ChannelProxy};
pub use error::{DtxError, Result};
pub use session::Session;
pub use transport::{connect_to_developer_server, ServiceOpener, Transport};
