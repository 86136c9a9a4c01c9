//! Auxiliary argument codec: a little-endian, tagged, positional parameter
//! list accompanying a selector or return value.

use bytes::BufMut;

use crate::{
    archive::{self, ClassRegistry, Value},
    error::{ProtocolError, Result},
};

/// Magic constant prefixing every auxiliary blob.
pub const MAGIC: u32 = 0x1f0;

/// Tag identifying a keyed-archive-encoded object entry.
pub const TAG_OBJECT: u32 = 2;

/// Tag identifying a signed 32-bit integer entry.
pub const TAG_INT32: u32 = 3;

/// Tag identifying a signed 64-bit integer entry.
pub const TAG_INT64: u32 = 4;

/// One positional auxiliary argument.
#[derive(Debug, Clone, PartialEq)]
pub enum AuxEntry {
    /// A keyed-archive-encoded object (tag `OBJECT`).
    Object(Value),
    /// A signed 32-bit integer (tag `INT32`).
    Int32(i32),
    /// A signed 64-bit integer (tag `INT64`).
    Int64(i64),
}

impl AuxEntry {
    /// Convenience constructor for the common `OBJECT` case.
    #[must_use]
    pub fn object(value: impl Into<Value>) -> Self {
        Self::Object(value.into())
    }
}

/// Encode a sequence of auxiliary entries into the wire blob (magic, length,
/// then each tagged entry).
pub fn encode(entries: &[AuxEntry]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    for entry in entries {
        match entry {
            AuxEntry::Object(value) => {
                let encoded = archive::encode(value)?;
                body.put_u32_le(TAG_OBJECT);
                body.put_u32_le(encoded.len() as u32);
                body.put_slice(&encoded);
            },
            AuxEntry::Int32(v) => {
                body.put_u32_le(TAG_INT32);
                body.put_i32_le(*v);
            },
            AuxEntry::Int64(v) => {
                body.put_u32_le(TAG_INT64);
                body.put_i64_le(*v);
            },
        }
    }

    let mut out = Vec::with_capacity(8 + body.len());
    out.put_u32_le(MAGIC);
    out.put_u32_le(body.len() as u32);
    out.put_slice(&body);
    Ok(out)
}

/// Decode an auxiliary blob produced by [`encode`].
///
/// An unrecognized tag fails loudly rather than being skipped, per spec.
pub fn decode(bytes: &[u8]) -> Result<Vec<AuxEntry>> {
    // The KA-encoded OBJECT sub-values don't need class dispatch here: a
    // fresh registry is sufficient because only primitive KA values
    // (strings, numbers, dicts, arrays, null) are ever embedded in an
    // auxiliary OBJECT entry per the wire contract.
    let registry = ClassRegistry::with_builtins();
    decode_with_registry(bytes, &registry)
}

/// Decode an auxiliary blob, dispatching embedded `OBJECT` entries through
/// `registry`.
pub fn decode_with_registry(bytes: &[u8], registry: &ClassRegistry) -> Result<Vec<AuxEntry>> {
    let mut cursor = Cursor::new(bytes);

    let magic = cursor.take_u32()?;
    if magic != MAGIC {
        return Err(ProtocolError::ArchiveDecode(format!(
            "bad auxiliary magic: expected {MAGIC:#x}, got {magic:#x}"
        )));
    }

    let length = cursor.take_u32()? as usize;
    let body_end = cursor.pos.checked_add(length).ok_or_else(|| {
        ProtocolError::ArchiveDecode("auxiliary length overflowed buffer bounds".to_string())
    })?;
    if body_end > bytes.len() {
        return Err(ProtocolError::FrameTooShort { expected: body_end, actual: bytes.len() });
    }

    let mut entries = Vec::new();
    while cursor.pos < body_end {
        let tag = cursor.take_u32()?;
        match tag {
            TAG_OBJECT => {
                let len = cursor.take_u32()? as usize;
                let raw = cursor.take_slice(len)?;
                let value = archive::decode(raw, registry)?;
                entries.push(AuxEntry::Object(value));
            },
            TAG_INT32 => {
                let v = cursor.take_i32()?;
                entries.push(AuxEntry::Int32(v));
            },
            TAG_INT64 => {
                let v = cursor.take_i64()?;
                entries.push(AuxEntry::Int64(v));
            },
            other => {
                return Err(ProtocolError::ArchiveDecode(format!(
                    "unknown auxiliary entry tag {other:#x}"
                )));
            },
        }
    }

    Ok(entries)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| {
            ProtocolError::ArchiveDecode("entry length overflowed buffer bounds".to_string())
        })?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| ProtocolError::FrameTooShort { expected: end, actual: self.bytes.len() })?;
        self.pos = end;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32> {
        let slice = self.take_slice(4)?;
        Ok(u32::from_le_bytes(slice.try_into().expect("slice of length 4")))
    }

    fn take_i32(&mut self) -> Result<i32> {
        let slice = self.take_slice(4)?;
        Ok(i32::from_le_bytes(slice.try_into().expect("slice of length 4")))
    }

    fn take_i64(&mut self) -> Result<i64> {
        let slice = self.take_slice(8)?;
        Ok(i64::from_le_bytes(slice.try_into().expect("slice of length 8")))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn round_trip_mixed_entries() {
        let entries = vec![
            AuxEntry::Int64(42),
            AuxEntry::Object(Value::String("deviceinfo".to_string())),
            AuxEntry::Int32(-7),
        ];
        let encoded = encode(&entries).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn empty_entries_round_trip() {
        let encoded = encode(&[]).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut bytes = Vec::new();
        bytes.put_u32_le(MAGIC);
        bytes.put_u32_le(4);
        bytes.put_u32_le(0xDEAD);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = Vec::new();
        bytes.put_u32_le(0xBAD);
        bytes.put_u32_le(0);
        assert!(decode(&bytes).is_err());
    }

    fn arbitrary_entry() -> impl Strategy<Value = AuxEntry> {
        prop_oneof![
            any::<i64>().prop_map(AuxEntry::Int64),
            any::<i32>().prop_map(AuxEntry::Int32),
            ".{0,40}".prop_map(|s| AuxEntry::Object(Value::String(s))),
            any::<i64>().prop_map(|n| AuxEntry::Object(Value::Int(n))),
        ]
    }

    proptest! {
        #[test]
        fn prop_aux_round_trip(entries in prop::collection::vec(arbitrary_entry(), 0..8)) {
            let encoded = encode(&entries).expect("encode should succeed");
            let decoded = decode(&encoded).expect("decode should succeed");
            prop_assert_eq!(decoded, entries);
        }
    }
}
