//! Payload header and the `encode_payload`/`decode_payload` pipeline.
//!
//! A frame's payload (the bytes following its 32-byte [`FrameHeader`][crate::FrameHeader])
//! is itself a 16-byte header followed by an auxiliary blob and a
//! keyed-archive-encoded selector or return value.

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    aux::{self, AuxEntry},
    error::{ProtocolError, Result},
    archive::{ClassRegistry, Value},
};

/// Low 16 bits of `flags`: message type. `2` is the only type this core
/// emits or expects ("instruments").
pub const MESSAGE_TYPE_INSTRUMENTS: u32 = 2;

/// Bit set in `flags` when the sender expects a reply.
pub const EXPECTS_REPLY_BIT: u32 = 0x1000;

/// Mask over the bits of `flags` that encode a compression code. Any
/// non-zero value here is rejected.
pub const COMPRESSION_MASK: u32 = 0x0FF000;

/// Fixed 16-byte payload header (little-endian), with 4 reserved/padding
/// bytes at the end.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Debug, PartialEq, Eq)]
pub struct PayloadHeader {
    flags: [u8; 4],
    auxiliary_length: [u8; 4],
    total_length: [u8; 4],
    _reserved: [u8; 4],
}

impl PayloadHeader {
    /// Size of the serialized header (16 bytes).
    pub const SIZE: usize = 16;

    /// Parse a header from exactly [`Self::SIZE`] bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;
        Ok(*header)
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Raw flags word.
    #[must_use]
    pub fn flags(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    /// Byte length of the auxiliary blob.
    #[must_use]
    pub fn auxiliary_length(&self) -> u32 {
        u32::from_le_bytes(self.auxiliary_length)
    }

    /// Byte length of the auxiliary blob plus the archive blob.
    #[must_use]
    pub fn total_length(&self) -> u32 {
        u32::from_le_bytes(self.total_length)
    }

    /// Compression code embedded in `flags`. Anything non-zero is rejected.
    #[must_use]
    pub fn compression_code(&self) -> u32 {
        (self.flags() & COMPRESSION_MASK) >> 12
    }

    /// Whether the `expects_reply` bit is set.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.flags() & EXPECTS_REPLY_BIT != 0
    }
}

/// Encode a selector and/or auxiliary arguments into one payload blob
/// (payload header + auxiliary blob + archive blob).
///
/// Either `selector` or `aux_entries` may be omitted independently.
pub fn encode_payload(
    selector: Option<&str>,
    aux_entries: Option<&[AuxEntry]>,
    expects_reply: bool,
) -> Result<Vec<u8>> {
    let aux_bytes = match aux_entries {
        Some(entries) => aux::encode(entries)?,
        None => Vec::new(),
    };
    let sel_bytes = match selector {
        Some(sel) => crate::archive::encode(&Value::String(sel.to_string()))?,
        None => Vec::new(),
    };

    let mut flags = MESSAGE_TYPE_INSTRUMENTS;
    if expects_reply {
        flags |= EXPECTS_REPLY_BIT;
    }

    let header = PayloadHeader {
        flags: flags.to_le_bytes(),
        auxiliary_length: (aux_bytes.len() as u32).to_le_bytes(),
        total_length: ((aux_bytes.len() + sel_bytes.len()) as u32).to_le_bytes(),
        _reserved: [0; 4],
    };

    let mut out = Vec::with_capacity(PayloadHeader::SIZE + aux_bytes.len() + sel_bytes.len());
    out.put_slice(&header.to_bytes());
    out.put_slice(&aux_bytes);
    out.put_slice(&sel_bytes);
    Ok(out)
}

/// Decoded payload: the archived return value (or selector, on the request
/// side) and any auxiliary entries.
pub struct DecodedPayload {
    /// The archived object carried after the auxiliary blob, or `None` if
    /// the archive blob was empty.
    pub value: Option<Value>,
    /// Auxiliary entries, or `None` if `auxiliary_length` was zero.
    pub aux: Option<Vec<AuxEntry>>,
}

/// Decode a payload blob produced by [`encode_payload`] (or received from the
/// peer).
///
/// # Errors
///
/// [`ProtocolError::CompressionUnsupported`] if the payload declares a
/// non-zero compression code — no partial decode is attempted in that case.
pub fn decode_payload(bytes: &[u8], registry: &ClassRegistry) -> Result<DecodedPayload> {
    let header = PayloadHeader::parse(bytes)?;

    let compression = header.compression_code();
    if compression != 0 {
        return Err(ProtocolError::CompressionUnsupported(compression));
    }

    let aux_start = PayloadHeader::SIZE;
    let aux_len = header.auxiliary_length() as usize;
    let aux_end = aux_start.checked_add(aux_len).ok_or_else(|| {
        ProtocolError::ArchiveDecode("auxiliary_length overflowed buffer bounds".to_string())
    })?;

    let total_len = header.total_length() as usize;
    let obj_len = total_len.checked_sub(aux_len).ok_or_else(|| {
        ProtocolError::ArchiveDecode("total_length smaller than auxiliary_length".to_string())
    })?;

    let obj_end = aux_end.checked_add(obj_len).ok_or_else(|| {
        ProtocolError::ArchiveDecode("total_length overflowed buffer bounds".to_string())
    })?;

    let bytes_len = bytes.len();
    if obj_end > bytes_len {
        return Err(ProtocolError::FrameTooShort { expected: obj_end, actual: bytes_len });
    }

    let aux = if aux_len > 0 {
        Some(aux::decode_with_registry(&bytes[aux_start..aux_end], registry)?)
    } else {
        None
    };

    let value = if obj_len > 0 {
        match crate::archive::decode(&bytes[aux_end..obj_end], registry) {
            Ok(value) => Some(value),
            Err(ProtocolError::ArchiveClassMissing { class, plist_dump }) => {
                return Err(ProtocolError::ArchiveClassMissing { class, plist_dump });
            },
            Err(err @ ProtocolError::ArchiveDecode(_)) => {
                tracing::warn!(error = %err, "invalid plist in payload, treating return as null");
                None
            },
            Err(other) => return Err(other),
        }
    } else {
        None
    };

    Ok(DecodedPayload { value, aux })
}

/// Convenience: wrap `bytes` so callers that need `Bytes` (e.g. the frame
/// codec's payload carrier) don't have to copy again.
#[must_use]
pub fn as_bytes(buf: Vec<u8>) -> Bytes {
    Bytes::from(buf)
}
