//! Low-level binary property list (`bplist00`) codec.
//!
//! This is the container format the keyed-archive layer ([`super::codec`])
//! builds its object graph on top of. It knows nothing about `$class`/
//! `$objects` conventions — only the primitive node types Apple's binary
//! plist format defines, and the object table/offset table/trailer
//! bookkeeping needed to serialize a graph of them.

use crate::error::{ProtocolError, Result};

/// One node in a binary plist object graph.
///
/// Container nodes (`Array`/`Dict`) hold their children inline here; the
/// object-table indirection used on the wire is an encoding detail handled
/// by [`encode`]/[`decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum PNode {
    /// The `null` marker object.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point real.
    Real(f64),
    /// A date, stored as seconds since the Mac absolute epoch (2001-01-01).
    Date(f64),
    /// Opaque byte data.
    Data(Vec<u8>),
    /// A text string.
    String(String),
    /// An ordered array of nodes.
    Array(Vec<PNode>),
    /// An ordered key/value mapping (plist dict keys are always strings).
    Dict(Vec<(PNode, PNode)>),
    /// A class/object reference (`CF$UID`).
    Uid(u64),
}

const HEADER: &[u8; 8] = b"bplist00";
const TRAILER_SIZE: usize = 32;

/// Encode a plist object graph to `bplist00` bytes.
pub fn encode(root: &PNode) -> Vec<u8> {
    let mut objects: Vec<Entry> = Vec::new();
    let root_index = flatten(root, &mut objects);

    let ref_size = min_byte_width(objects.len().saturating_sub(1) as u64);

    let mut out = Vec::new();
    out.extend_from_slice(HEADER);

    let mut offsets = Vec::with_capacity(objects.len());
    for entry in &objects {
        offsets.push(out.len() as u64);
        write_entry(&mut out, entry, ref_size);
    }

    let offset_table_offset = out.len() as u64;
    let offset_size = min_byte_width(*offsets.last().unwrap_or(&0));
    for offset in &offsets {
        write_uint_be(&mut out, *offset, offset_size);
    }

    // Trailer: 6 unused bytes, sortVersion, offsetIntSize, objectRefSize,
    // numObjects (8B BE), topObject (8B BE), offsetTableOffset (8B BE).
    out.extend_from_slice(&[0u8; 6]);
    out.push(0); // sort version
    out.push(offset_size);
    out.push(ref_size);
    out.extend_from_slice(&(objects.len() as u64).to_be_bytes());
    out.extend_from_slice(&(root_index as u64).to_be_bytes());
    out.extend_from_slice(&offset_table_offset.to_be_bytes());

    out
}

/// Decode `bplist00` bytes back into a plist object graph.
pub fn decode(bytes: &[u8]) -> Result<PNode> {
    if bytes.len() < HEADER.len() + TRAILER_SIZE {
        return Err(ProtocolError::ArchiveDecode("buffer too short for bplist".to_string()));
    }
    if &bytes[..HEADER.len()] != HEADER {
        return Err(ProtocolError::ArchiveDecode("missing bplist00 header".to_string()));
    }

    let trailer = &bytes[bytes.len() - TRAILER_SIZE..];
    let offset_int_size = trailer[6] as usize;
    let object_ref_size = trailer[7] as usize;
    let num_objects = u64::from_be_bytes(trailer[8..16].try_into().unwrap()) as usize;
    let top_object = u64::from_be_bytes(trailer[16..24].try_into().unwrap()) as usize;
    let offset_table_offset = u64::from_be_bytes(trailer[24..32].try_into().unwrap()) as usize;

    if offset_int_size == 0 || object_ref_size == 0 {
        return Err(ProtocolError::ArchiveDecode("zero-width offset/ref size".to_string()));
    }

    let mut offsets = Vec::with_capacity(num_objects);
    for i in 0..num_objects {
        let start = offset_table_offset
            .checked_add(i.checked_mul(offset_int_size).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;
        let slice = bytes
            .get(start..start + offset_int_size)
            .ok_or_else(|| ProtocolError::ArchiveDecode("offset table out of bounds".to_string()))?;
        offsets.push(read_uint_be(slice));
    }

    let reader = Reader { bytes, offsets: &offsets, object_ref_size };
    reader.read_object(top_object)
}

fn overflow() -> ProtocolError {
    ProtocolError::ArchiveDecode("integer overflow while decoding bplist".to_string())
}

struct Reader<'a> {
    bytes: &'a [u8],
    offsets: &'a [u64],
    object_ref_size: usize,
}

impl<'a> Reader<'a> {
    fn read_object(&self, index: usize) -> Result<PNode> {
        let offset = *self
            .offsets
            .get(index)
            .ok_or_else(|| ProtocolError::ArchiveDecode(format!("object index {index} out of range")))?
            as usize;
        let marker = *self
            .bytes
            .get(offset)
            .ok_or_else(|| ProtocolError::ArchiveDecode("object marker out of bounds".to_string()))?;

        let kind = marker >> 4;
        let low = marker & 0x0f;

        match kind {
            0x0 => match low {
                0x0 => Ok(PNode::Null),
                0x8 => Ok(PNode::Bool(false)),
                0x9 => Ok(PNode::Bool(true)),
                _ => Err(ProtocolError::ArchiveDecode(format!("unknown singleton marker {marker:#x}"))),
            },
            0x1 => {
                let width = 1usize << low;
                let bytes = self.slice_at(offset + 1, width)?;
                Ok(PNode::Int(read_int_be(bytes)))
            },
            0x2 => {
                let width = 1usize << low;
                let bytes = self.slice_at(offset + 1, width)?;
                let value = match width {
                    4 => f64::from(f32::from_be_bytes(bytes.try_into().unwrap())),
                    8 => f64::from_be_bytes(bytes.try_into().unwrap()),
                    _ => {
                        return Err(ProtocolError::ArchiveDecode(format!(
                            "unsupported real width {width}"
                        )));
                    },
                };
                Ok(PNode::Real(value))
            },
            0x3 if low == 0x3 => {
                let bytes = self.slice_at(offset + 1, 8)?;
                Ok(PNode::Date(f64::from_be_bytes(bytes.try_into().unwrap())))
            },
            0x4 => {
                let (count, data_offset) = self.read_count(offset, low)?;
                let bytes = self.slice_at(data_offset, count)?;
                Ok(PNode::Data(bytes.to_vec()))
            },
            0x5 => {
                let (count, data_offset) = self.read_count(offset, low)?;
                let bytes = self.slice_at(data_offset, count)?;
                let s = bytes.iter().map(|&b| b as char).collect();
                Ok(PNode::String(s))
            },
            0x6 => {
                let (count, data_offset) = self.read_count(offset, low)?;
                let bytes = self.slice_at(data_offset, count * 2)?;
                let units: Vec<u16> =
                    bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
                let s = String::from_utf16(&units)
                    .map_err(|e| ProtocolError::ArchiveDecode(format!("invalid utf16 string: {e}")))?;
                Ok(PNode::String(s))
            },
            0x8 => {
                let width = low as usize + 1;
                let bytes = self.slice_at(offset + 1, width)?;
                Ok(PNode::Uid(read_uint_be(bytes)))
            },
            0xA => {
                let (count, refs_offset) = self.read_count(offset, low)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let idx = self.read_ref(refs_offset, i)?;
                    items.push(self.read_object(idx)?);
                }
                Ok(PNode::Array(items))
            },
            0xD => {
                let (count, refs_offset) = self.read_count(offset, low)?;
                let values_offset = refs_offset + count * self.object_ref_size;
                let mut pairs = Vec::with_capacity(count);
                for i in 0..count {
                    let key_idx = self.read_ref(refs_offset, i)?;
                    let value_idx = self.read_ref(values_offset, i)?;
                    pairs.push((self.read_object(key_idx)?, self.read_object(value_idx)?));
                }
                Ok(PNode::Dict(pairs))
            },
            _ => Err(ProtocolError::ArchiveDecode(format!("unsupported object marker {marker:#x}"))),
        }
    }

    /// Reads the `count` encoded in the low nibble of a container/string/data
    /// marker (or, if the nibble is `0xF`, the extended integer that
    /// immediately follows). Returns `(count, offset_of_payload)`.
    fn read_count(&self, marker_offset: usize, low_nibble: u8) -> Result<(usize, usize)> {
        if low_nibble != 0x0f {
            return Ok((low_nibble as usize, marker_offset + 1));
        }
        let int_marker = *self
            .bytes
            .get(marker_offset + 1)
            .ok_or_else(|| ProtocolError::ArchiveDecode("truncated extended count".to_string()))?;
        if int_marker >> 4 != 0x1 {
            return Err(ProtocolError::ArchiveDecode("expected int marker for extended count".to_string()));
        }
        let width = 1usize << (int_marker & 0x0f);
        let bytes = self.slice_at(marker_offset + 2, width)?;
        let count = read_int_be(bytes) as usize;
        Ok((count, marker_offset + 2 + width))
    }

    fn read_ref(&self, base: usize, index: usize) -> Result<usize> {
        let bytes = self.slice_at(base + index * self.object_ref_size, self.object_ref_size)?;
        Ok(read_uint_be(bytes) as usize)
    }

    fn slice_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        self.bytes
            .get(offset..offset + len)
            .ok_or_else(|| ProtocolError::ArchiveDecode("object payload out of bounds".to_string()))
    }
}

/// A flattened, encodable plist object (children referenced by index).
enum Entry {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Date(f64),
    Data(Vec<u8>),
    String(String),
    Array(Vec<usize>),
    Dict(Vec<usize>, Vec<usize>),
}

fn flatten(node: &PNode, objects: &mut Vec<Entry>) -> usize {
    match node {
        PNode::Null => push(objects, Entry::Null),
        PNode::Bool(b) => push(objects, Entry::Bool(*b)),
        PNode::Int(i) => push(objects, Entry::Int(*i)),
        PNode::Real(r) => push(objects, Entry::Real(*r)),
        PNode::Date(d) => push(objects, Entry::Date(*d)),
        PNode::Data(d) => push(objects, Entry::Data(d.clone())),
        PNode::String(s) => push(objects, Entry::String(s.clone())),
        PNode::Uid(u) => push(objects, Entry::Int(*u as i64)),
        PNode::Array(items) => {
            let refs: Vec<usize> = items.iter().map(|item| flatten(item, objects)).collect();
            push(objects, Entry::Array(refs))
        },
        PNode::Dict(pairs) => {
            let krefs: Vec<usize> = pairs.iter().map(|(k, _)| flatten(k, objects)).collect();
            let vrefs: Vec<usize> = pairs.iter().map(|(_, v)| flatten(v, objects)).collect();
            push(objects, Entry::Dict(krefs, vrefs))
        },
    }
}

fn push(objects: &mut Vec<Entry>, entry: Entry) -> usize {
    objects.push(entry);
    objects.len() - 1
}

fn write_entry(out: &mut Vec<u8>, entry: &Entry, ref_size: u8) {
    match entry {
        Entry::Null => out.push(0x00),
        Entry::Bool(false) => out.push(0x08),
        Entry::Bool(true) => out.push(0x09),
        Entry::Int(i) => write_int(out, *i),
        Entry::Real(r) => {
            out.push(0x23);
            out.extend_from_slice(&r.to_be_bytes());
        },
        Entry::Date(d) => {
            out.push(0x33);
            out.extend_from_slice(&d.to_be_bytes());
        },
        Entry::Data(d) => {
            write_marker_and_count(out, 0x4, d.len());
            out.extend_from_slice(d);
        },
        Entry::String(s) => {
            if s.is_ascii() {
                write_marker_and_count(out, 0x5, s.len());
                out.extend_from_slice(s.as_bytes());
            } else {
                let units: Vec<u16> = s.encode_utf16().collect();
                write_marker_and_count(out, 0x6, units.len());
                for unit in units {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
        },
        Entry::Array(refs) => {
            write_marker_and_count(out, 0xA, refs.len());
            for r in refs {
                write_uint_be(out, *r as u64, ref_size);
            }
        },
        Entry::Dict(krefs, vrefs) => {
            write_marker_and_count(out, 0xD, krefs.len());
            for r in krefs {
                write_uint_be(out, *r as u64, ref_size);
            }
            for r in vrefs {
                write_uint_be(out, *r as u64, ref_size);
            }
        },
    }
}

fn write_int(out: &mut Vec<u8>, value: i64) {
    let width: u8 = if i8::try_from(value).is_ok() {
        1
    } else if i16::try_from(value).is_ok() {
        2
    } else if i32::try_from(value).is_ok() {
        4
    } else {
        8
    };
    let log2 = width.trailing_zeros() as u8;
    out.push(0x10 | log2);
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width as usize..]);
}

fn write_marker_and_count(out: &mut Vec<u8>, kind: u8, count: usize) {
    if count < 0x0f {
        out.push((kind << 4) | count as u8);
    } else {
        out.push((kind << 4) | 0x0f);
        write_int(out, count as i64);
    }
}

fn write_uint_be(out: &mut Vec<u8>, value: u64, width: u8) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width as usize..]);
}

fn read_uint_be(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

fn read_int_be(bytes: &[u8]) -> i64 {
    if bytes.len() >= 8 {
        return i64::from_be_bytes(bytes[bytes.len() - 8..].try_into().unwrap());
    }
    // Sign-extend narrower widths.
    let mut buf = [0u8; 8];
    let fill = if bytes[0] & 0x80 != 0 { 0xFF } else { 0x00 };
    buf.fill(fill);
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    i64::from_be_bytes(buf)
}

fn min_byte_width(max_value: u64) -> u8 {
    if max_value <= u64::from(u8::MAX) {
        1
    } else if max_value <= u64::from(u16::MAX) {
        2
    } else if max_value <= u64::from(u32::MAX) {
        4
    } else {
        8
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn round_trip_scalar_values() {
        for node in [
            PNode::Null,
            PNode::Bool(true),
            PNode::Bool(false),
            PNode::Int(-1),
            PNode::Int(12345),
            PNode::Real(3.5),
            PNode::Date(700_000_000.0),
            PNode::String("hello".to_string()),
            PNode::Data(vec![1, 2, 3, 4]),
        ] {
            let encoded = encode(&node);
            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded, node);
        }
    }

    #[test]
    fn round_trip_nested_containers() {
        let node = PNode::Dict(vec![
            (PNode::String("a".to_string()), PNode::Int(1)),
            (
                PNode::String("b".to_string()),
                PNode::Array(vec![PNode::String("x".to_string()), PNode::Null, PNode::Bool(true)]),
            ),
        ]);
        let encoded = encode(&node);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn round_trip_large_array_needs_extended_count() {
        let items: Vec<PNode> = (0..40).map(PNode::Int).collect();
        let node = PNode::Array(items.clone());
        let encoded = encode(&node);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, PNode::Array(items));
    }

    #[test]
    fn round_trip_non_ascii_string() {
        let node = PNode::String("héllo wörld 🎉".to_string());
        let encoded = encode(&node);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, node);
    }

    fn arbitrary_scalar() -> impl Strategy<Value = PNode> {
        prop_oneof![
            Just(PNode::Null),
            any::<bool>().prop_map(PNode::Bool),
            any::<i32>().prop_map(|i| PNode::Int(i64::from(i))),
            "[a-zA-Z0-9]{0,24}".prop_map(PNode::String),
        ]
    }

    proptest! {
        #[test]
        fn prop_scalar_round_trip(node in arbitrary_scalar()) {
            let encoded = encode(&node);
            let decoded = decode(&encoded).expect("decode should succeed");
            prop_assert_eq!(decoded, node);
        }
    }
}
