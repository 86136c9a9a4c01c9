//! Frame header: the fixed 32-byte, little-endian message header.
//!
//! The header identifies a single fragment of a (possibly fragmented)
//! logical message: which channel it targets, whether the sender wants a
//! reply, and where it sits in its fragment sequence.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{ProtocolError, Result};

/// Fixed 32-byte frame header (little-endian).
///
/// All fields are stored as raw little-endian byte arrays rather than native
/// integers so the struct has a guaranteed, platform-independent layout and
/// can be parsed directly from (or written directly to) wire bytes.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    header_size: [u8; 4],
    fragment_id: [u8; 4],
    fragment_count: [u8; 4],
    length: [u8; 4],
    identifier: [u8; 4],
    conversation_index: [u8; 4],
    channel_code: [u8; 4],
    expects_reply: [u8; 4],
}

impl FrameHeader {
    /// Size of the serialized header (32 bytes).
    pub const SIZE: usize = 32;

    /// Build a single-fragment header for an outbound message.
    ///
    /// `length` is the number of payload bytes following this header.
    #[must_use]
    pub fn build(channel_code: i32, identifier: u32, length: u32, expects_reply: bool) -> Self {
        Self {
            header_size: (Self::SIZE as u32).to_le_bytes(),
            fragment_id: 0u32.to_le_bytes(),
            fragment_count: 1u32.to_le_bytes(),
            length: length.to_le_bytes(),
            identifier: identifier.to_le_bytes(),
            conversation_index: 0u32.to_le_bytes(),
            channel_code: channel_code.to_le_bytes(),
            expects_reply: u32::from(expects_reply).to_le_bytes(),
        }
    }

    /// Parse a header from exactly [`Self::SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if `bytes` is shorter than
    ///   [`Self::SIZE`].
    /// - [`ProtocolError::InvalidHeaderSize`] if the header's own
    ///   `header_size` field is not 32.
    /// - [`ProtocolError::ZeroFragmentCount`] if `fragment_count` is zero.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        let declared_size = u32::from_le_bytes(header.header_size);
        if declared_size != Self::SIZE as u32 {
            return Err(ProtocolError::InvalidHeaderSize(declared_size));
        }

        if header.fragment_count() == 0 {
            return Err(ProtocolError::ZeroFragmentCount);
        }

        Ok(*header)
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Declared header size (always 32 for a validly-parsed header).
    #[must_use]
    pub fn header_size(&self) -> u32 {
        u32::from_le_bytes(self.header_size)
    }

    /// Index of this fragment within its message.
    #[must_use]
    pub fn fragment_id(&self) -> u32 {
        u32::from_le_bytes(self.fragment_id)
    }

    /// Total number of fragments in this message.
    #[must_use]
    pub fn fragment_count(&self) -> u32 {
        u32::from_le_bytes(self.fragment_count)
    }

    /// Payload byte count carried by this fragment.
    #[must_use]
    pub fn length(&self) -> u32 {
        u32::from_le_bytes(self.length)
    }

    /// Message identifier, shared across all fragments of one message.
    #[must_use]
    pub fn identifier(&self) -> u32 {
        u32::from_le_bytes(self.identifier)
    }

    /// Conversation index (always 0 for messages this core emits).
    #[must_use]
    pub fn conversation_index(&self) -> u32 {
        u32::from_le_bytes(self.conversation_index)
    }

    /// Channel this message targets.
    #[must_use]
    pub fn channel_code(&self) -> i32 {
        i32::from_le_bytes(self.channel_code)
    }

    /// Whether the sender expects a reply.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        u32::from_le_bytes(self.expects_reply) != 0
    }

    /// Whether this is the first fragment of a multi-fragment message (which
    /// carries no payload bytes of its own).
    #[must_use]
    pub fn is_header_only_lead_fragment(&self) -> bool {
        self.fragment_count() > 1 && self.fragment_id() == 0
    }

    /// Whether this is the final fragment of its message.
    #[must_use]
    pub fn is_last_fragment(&self) -> bool {
        self.fragment_id() == self.fragment_count().saturating_sub(1)
    }

    /// Validate that `next` is a continuation fragment of the message begun
    /// by `self` — same `identifier`, same `channel_code`, same
    /// `fragment_count`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::FragmentMismatch`] if any of those fields disagree.
    pub fn check_continues(&self, next: &Self) -> Result<()> {
        if next.identifier() != self.identifier() || next.channel_code() != self.channel_code() {
            return Err(ProtocolError::FragmentMismatch {
                expected_identifier: self.identifier(),
                expected_channel: self.channel_code(),
                actual_identifier: next.identifier(),
                actual_channel: next.channel_code(),
            });
        }
        Ok(())
    }
}
