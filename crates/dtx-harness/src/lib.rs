//! Dev-only test support: an in-memory [`Transport`] implementation and
//! `proptest` strategies for generating [`Value`] graphs, shared by
//! `dtx-proto` and `dtx-core`'s test suites.

use std::{collections::VecDeque, io};

use dtx_core::Transport;
use dtx_proto::{archive::Value, aux::AuxEntry, header::FrameHeader, payload};
use proptest::prelude::*;

/// An in-memory, scriptable [`Transport`]: bytes queued via [`Self::push_frame`]
/// (or [`Self::push_bytes`]) are handed back through `recv_exact`, and every
/// byte written via `send_all` is recorded in [`Self::sent`] for assertions.
#[derive(Debug, Default)]
pub struct MockTransport {
    inbound: VecDeque<u8>,
    sent: Vec<u8>,
    tls_disabled: bool,
}

impl MockTransport {
    /// An empty mock transport with nothing queued to read.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes to be returned by subsequent `recv_exact` calls.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Queue one complete single-fragment frame (header + payload bytes).
    pub fn push_frame(&mut self, channel_code: i32, identifier: u32, payload_bytes: &[u8], expects_reply: bool) {
        let header = FrameHeader::build(channel_code, identifier, payload_bytes.len() as u32, expects_reply);
        self.push_bytes(&header.to_bytes());
        self.push_bytes(payload_bytes);
    }

    /// Queue one complete frame carrying `selector`/`aux` encoded through
    /// the real payload codec, as a scripted reply from the peer.
    ///
    /// # Errors
    ///
    /// Propagates any [`dtx_proto::ProtocolError`] from encoding the
    /// payload.
    pub fn push_reply(
        &mut self,
        channel_code: i32,
        identifier: u32,
        selector: Option<&str>,
        aux: Option<&[AuxEntry]>,
        expects_reply: bool,
    ) -> dtx_proto::Result<()> {
        let payload_bytes = payload::encode_payload(selector, aux, expects_reply)?;
        self.push_frame(channel_code, identifier, &payload_bytes, expects_reply);
        Ok(())
    }

    /// Queue a fragmented reply: a header-only lead fragment followed by
    /// `chunks`, each its own continuation fragment.
    pub fn push_fragmented(&mut self, channel_code: i32, identifier: u32, chunks: &[&[u8]]) {
        let fragment_count = (chunks.len() + 1) as u32;
        let lead = FrameHeader::build(channel_code, identifier, 0, false);
        self.push_bytes(&with_fragment_fields(lead, 0, fragment_count).to_bytes());

        for (index, chunk) in chunks.iter().enumerate() {
            let header =
                with_fragment_fields(FrameHeader::build(channel_code, identifier, chunk.len() as u32, false), (index + 1) as u32, fragment_count);
            self.push_bytes(&header.to_bytes());
            self.push_bytes(chunk);
        }
    }

    /// Every byte written to this transport via `send_all`, in order.
    #[must_use]
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Parse [`Self::sent`] back into `(header, payload)` pairs, assuming
    /// every written frame was a single, unfragmented send (true of
    /// everything this core's `Session` emits).
    #[must_use]
    pub fn sent_frames(&self) -> Vec<(FrameHeader, Vec<u8>)> {
        let mut frames = Vec::new();
        let mut offset = 0;
        while offset + FrameHeader::SIZE <= self.sent.len() {
            let Ok(header) = FrameHeader::parse(&self.sent[offset..offset + FrameHeader::SIZE]) else {
                break;
            };
            offset += FrameHeader::SIZE;
            let length = header.length() as usize;
            if offset + length > self.sent.len() {
                break;
            }
            let payload_bytes = self.sent[offset..offset + length].to_vec();
            offset += length;
            frames.push((header, payload_bytes));
        }
        frames
    }

    /// Whether [`dtx_core::Transport::disable_tls`] has been called.
    #[must_use]
    pub fn tls_disabled(&self) -> bool {
        self.tls_disabled
    }
}

impl Transport for MockTransport {
    fn send_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.sent.extend_from_slice(buf);
        Ok(())
    }

    fn recv_exact(&mut self, n: usize) -> io::Result<Vec<u8>> {
        if self.inbound.len() < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("mock transport exhausted: wanted {n} bytes, had {}", self.inbound.len()),
            ));
        }
        Ok(self.inbound.drain(..n).collect())
    }

    fn disable_tls(&mut self) {
        self.tls_disabled = true;
    }
}

/// Rewrite a header's `fragment_id`/`fragment_count` fields in place.
///
/// `FrameHeader::build` only ever produces single-fragment headers; tests
/// that need to script a multi-fragment sequence round-trip through bytes to
/// get at fields `dtx_proto` otherwise keeps private to the wire layer.
fn with_fragment_fields(header: FrameHeader, fragment_id: u32, fragment_count: u32) -> FrameHeader {
    let mut bytes = header.to_bytes();
    bytes[4..8].copy_from_slice(&fragment_id.to_le_bytes());
    bytes[8..12].copy_from_slice(&fragment_count.to_le_bytes());
    // A freshly-built header always parses; this never hits the error path.
    FrameHeader::parse(&bytes).unwrap_or(header)
}

/// A `proptest` strategy generating non-recursive [`Value`] leaves: null,
/// bool, int, and short ASCII strings.
#[must_use]
pub fn arbitrary_leaf_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|i| Value::Int(i64::from(i))),
        "[a-zA-Z0-9_./: -]{0,24}".prop_map(Value::String),
    ]
}

/// A `proptest` strategy generating arbitrarily nested [`Value`] graphs
/// (arrays and string-keyed dicts over [`arbitrary_leaf_value`] leaves).
#[must_use]
pub fn arbitrary_value() -> impl Strategy<Value = Value> {
    arbitrary_leaf_value().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec(("[a-zA-Z][a-zA-Z0-9]{0,12}", inner), 0..6).prop_map(Value::Dict),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_receive_bytes() {
        let mut transport = MockTransport::new();
        transport.push_bytes(&[1, 2, 3, 4]);
        assert_eq!(transport.recv_exact(2).unwrap(), vec![1, 2]);
        assert_eq!(transport.recv_exact(2).unwrap(), vec![3, 4]);
    }

    #[test]
    fn recv_exact_fails_when_exhausted() {
        let mut transport = MockTransport::new();
        transport.push_bytes(&[1]);
        assert!(transport.recv_exact(2).is_err());
    }

    #[test]
    fn sent_frames_round_trip_through_parsing() {
        let mut transport = MockTransport::new();
        transport.send_all(&FrameHeader::build(1, 2, 3, true).to_bytes()).unwrap();
        transport.send_all(&[0xAA, 0xBB, 0xCC]).unwrap();

        let frames = transport.sent_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.channel_code(), 1);
        assert_eq!(frames[0].1, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn push_fragmented_produces_a_lead_and_continuation_fragments() {
        let mut transport = MockTransport::new();
        transport.push_fragmented(4, 9, &[b"hello ", b"world"]);

        let lead_bytes = transport.recv_exact(FrameHeader::SIZE).unwrap();
        let lead = FrameHeader::parse(&lead_bytes).unwrap();
        assert_eq!(lead.fragment_count(), 3);
        assert_eq!(lead.fragment_id(), 0);
        assert_eq!(lead.length(), 0);
    }
}
