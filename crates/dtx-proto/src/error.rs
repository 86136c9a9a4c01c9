//! Error types for the wire-format layer.
//!
//! These are structural errors only: malformed headers, inconsistent
//! fragmentation, rejected compression, and archive decode failures. The
//! session layer (`dtx-core`) decides which of these are fatal to a
//! connection versus scoped to a single receive.

use thiserror::Error;

/// Result type used throughout `dtx-proto`.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while parsing or building DTX wire structures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Buffer was shorter than a fixed-size header requires.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum required length.
        expected: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// The header's self-reported size field was not the fixed 32 bytes.
    #[error("invalid header size: expected 32, got {0}")]
    InvalidHeaderSize(u32),

    /// `fragment_count` was zero, which can never describe a valid message.
    #[error("fragment count is zero")]
    ZeroFragmentCount,

    /// Two fragments claiming the same message disagreed on `identifier` or
    /// `channel_code`.
    #[error(
        "fragment mismatch: expected identifier={expected_identifier} channel={expected_channel}, \
         got identifier={actual_identifier} channel={actual_channel}"
    )]
    FragmentMismatch {
        /// Identifier carried by the first fragment.
        expected_identifier: u32,
        /// Channel code carried by the first fragment.
        expected_channel: i32,
        /// Identifier carried by the mismatched fragment.
        actual_identifier: u32,
        /// Channel code carried by the mismatched fragment.
        actual_channel: i32,
    },

    /// Payload header declared a non-zero compression code.
    #[error("compressed payloads are not supported (compression code {0:#x})")]
    CompressionUnsupported(u32),

    /// An archived object referenced a class with no registered decoder.
    #[error("no decoder registered for archive class {class:?}")]
    ArchiveClassMissing {
        /// The offending class name.
        class: String,
        /// Raw plist subtree for the object, for diagnostics.
        plist_dump: String,
    },

    /// The binary plist / keyed-archive payload was structurally invalid.
    #[error("invalid archive payload: {0}")]
    ArchiveDecode(String),

    /// A value could not be represented in the keyed-archive encoding.
    #[error("cannot encode value as archive: {0}")]
    ArchiveEncode(String),
}

impl ProtocolError {
    /// Whether this error represents a fatal framing/protocol violation as
    /// opposed to a scoped decode failure (only `CompressionUnsupported` and
    /// `ArchiveClassMissing` are scoped — see spec §7).
    #[must_use]
    pub fn is_frame_fatal(&self) -> bool {
        !matches!(self, Self::CompressionUnsupported(_) | Self::ArchiveClassMissing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_decode_failures_are_not_frame_fatal() {
        assert!(!ProtocolError::CompressionUnsupported(0x01).is_frame_fatal());

        assert!(
            !ProtocolError::ArchiveClassMissing {
                class: "NSSomeUnknownClass".to_string(),
                plist_dump: String::new(),
            }
            .is_frame_fatal()
        );
    }

    #[test]
    fn framing_violations_are_frame_fatal() {
        assert!(ProtocolError::FrameTooShort { expected: 32, actual: 10 }.is_frame_fatal());
        assert!(ProtocolError::InvalidHeaderSize(16).is_frame_fatal());
        assert!(ProtocolError::ZeroFragmentCount.is_frame_fatal());

        assert!(
            ProtocolError::FragmentMismatch {
                expected_identifier: 1,
                expected_channel: 0,
                actual_identifier: 2,
                actual_channel: 0,
            }
            .is_frame_fatal()
        );

        assert!(ProtocolError::ArchiveDecode("truncated plist".to_string()).is_frame_fatal());
        assert!(ProtocolError::ArchiveEncode("unsupported value".to_string()).is_frame_fatal());
    }
}
