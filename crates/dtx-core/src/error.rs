//! Session-level error type.
//!
//! Wraps the wire-format errors from `dtx-proto` with the failures that only
//! make sense once there's a live session: transport I/O, handshake/protocol
//! assertions, and the two non-fatal "the peer said no" outcomes a caller is
//! expected to handle without tearing the session down.

use std::io;

use dtx_proto::ProtocolError;
use thiserror::Error;

/// Result type used throughout `dtx-core`.
pub type Result<T> = std::result::Result<T, DtxError>;

/// Errors raised while driving a [`crate::session::Session`].
#[derive(Error, Debug)]
pub enum DtxError {
    /// The transport failed (short read, closed connection, I/O error).
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// A wire-format violation bubbled up from `dtx-proto`.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A handshake or other protocol-level assertion failed (wrong selector
    /// echoed back, empty capability map, unexpected channel-creation
    /// reply).
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A binding asked for a channel identifier the peer never advertised
    /// during the capability handshake.
    #[error("channel identifier not advertised by peer: {0}")]
    ChannelNotAdvertised(String),

    /// A binding's remote call completed but returned a value the domain
    /// semantics treat as failure (e.g. a null directory listing).
    #[error("domain error: {0}")]
    Domain(String),
}

impl DtxError {
    /// Whether this error leaves the session unusable.
    ///
    /// Transport failures, handshake assertions, and any protocol violation
    /// other than an unsupported compression code are fatal: the transport
    /// must be closed and the session discarded. `ChannelNotAdvertised` and
    /// `Domain` errors are reported to the caller but leave the session
    /// usable for further calls.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Handshake(_) => true,
            Self::Protocol(inner) => !matches!(inner, ProtocolError::CompressionUnsupported(_)),
            Self::ChannelNotAdvertised(_) | Self::Domain(_) => false,
        }
    }
}
