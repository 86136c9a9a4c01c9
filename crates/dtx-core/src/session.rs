//! [`Session`]: owns the transport, the monotonic identifier/channel-code
//! counters, the channel table, and the post-handshake capability set.

use std::collections::{HashMap, HashSet};

use dtx_proto::{
    archive::{ClassRegistry, Value},
    aux::AuxEntry,
    header::FrameHeader,
    payload,
};

use crate::{
    channel::ChannelHandle,
    error::{DtxError, Result},
    transport::Transport,
};

const ROOT_CHANNEL_CODE: i32 = 0;
const HANDSHAKE_SELECTOR: &str = "_notifyOfPublishedCapabilities:";
const REQUEST_CHANNEL_SELECTOR: &str = "_requestChannelWithCode:identifier:";

/// A live DTX session: one handshake, one channel table, one transport.
pub struct Session<T: Transport> {
    transport: T,
    next_identifier: u32,
    next_channel_code: i32,
    channels: HashMap<String, ChannelHandle>,
    supported_identifiers: HashSet<String>,
    registry: ClassRegistry,
    process_attributes: Vec<String>,
    system_attributes: Vec<String>,
}

impl<T: Transport> Session<T> {
    /// Wrap an already-connected transport. The session starts in the
    /// "handshaking" state — [`Self::perform_handshake`] must succeed before
    /// [`Self::make_channel`] will accept any identifier.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_identifier: 0,
            next_channel_code: 0,
            channels: HashMap::new(),
            supported_identifiers: HashSet::new(),
            registry: ClassRegistry::with_builtins(),
            process_attributes: Vec::new(),
            system_attributes: Vec::new(),
        }
    }

    /// The capability identifiers the peer advertised during the handshake.
    #[must_use]
    pub fn supported_identifiers(&self) -> &HashSet<String> {
        &self.supported_identifiers
    }

    /// Process attribute names fetched via `sysmon_process_attributes`, if
    /// any. Populated by that binding, not automatically during handshake —
    /// see `SPEC_FULL.md` §4.4.
    #[must_use]
    pub fn process_attributes(&self) -> &[String] {
        &self.process_attributes
    }

    /// System attribute names fetched via `sysmon_system_attributes`, if
    /// any.
    #[must_use]
    pub fn system_attributes(&self) -> &[String] {
        &self.system_attributes
    }

    pub(crate) fn set_process_attributes(&mut self, attrs: Vec<String>) {
        self.process_attributes = attrs;
    }

    pub(crate) fn set_system_attributes(&mut self, attrs: Vec<String>) {
        self.system_attributes = attrs;
    }

    /// Register (or replace) a decoder in this session's keyed-archive class
    /// registry. Expected to be called during setup only — see §5's
    /// "no runtime mutation" contract.
    pub fn register_archive_class(&mut self, class: impl Into<String>, decoder: dtx_proto::archive::Decoder) {
        self.registry.register(class, decoder);
    }

    /// Perform the capability handshake: advertise this core's own
    /// capabilities on channel 0 and record the peer's.
    ///
    /// # Errors
    ///
    /// [`DtxError::Handshake`] if the peer echoes back anything other than
    /// the same selector with a non-empty capability map as its first
    /// auxiliary entry.
    pub fn perform_handshake(&mut self) -> Result<()> {
        let capabilities = Value::Dict(vec![
            ("DTXBlockCompression".to_string(), Value::Int(0)),
            ("DTXConnection".to_string(), Value::Int(1)),
        ]);
        self.send_message(
            ROOT_CHANNEL_CODE,
            Some(HANDSHAKE_SELECTOR),
            Some(&[AuxEntry::object(capabilities)]),
            false,
        )?;

        let (value, aux) = self.recv_message()?;

        if value != Some(Value::String(HANDSHAKE_SELECTOR.to_string())) {
            return Err(DtxError::Handshake(format!(
                "expected echoed selector {HANDSHAKE_SELECTOR:?}, got {value:?}"
            )));
        }

        let Some(AuxEntry::Object(Value::Dict(pairs))) = aux.and_then(|entries| entries.into_iter().next())
        else {
            return Err(DtxError::Handshake(
                "handshake reply's first auxiliary entry was not a non-empty capability map".to_string(),
            ));
        };
        if pairs.is_empty() {
            return Err(DtxError::Handshake("peer advertised an empty capability map".to_string()));
        }

        self.supported_identifiers = pairs.into_iter().map(|(key, _)| key).collect();
        Ok(())
    }

    /// Look up (or lazily create) the channel bound to `identifier`.
    ///
    /// # Errors
    ///
    /// [`DtxError::ChannelNotAdvertised`] if `identifier` wasn't in the
    /// peer's handshake capability set. [`DtxError::Handshake`] if the
    /// channel-creation reply is anything other than null.
    pub fn make_channel(&mut self, identifier: &str) -> Result<ChannelHandle> {
        if let Some(handle) = self.channels.get(identifier) {
            return Ok(handle.clone());
        }

        if !self.supported_identifiers.contains(identifier) {
            return Err(DtxError::ChannelNotAdvertised(identifier.to_string()));
        }

        self.next_channel_code += 1;
        let code = self.next_channel_code;

        self.send_message(
            ROOT_CHANNEL_CODE,
            Some(REQUEST_CHANNEL_SELECTOR),
            Some(&[AuxEntry::Int64(i64::from(code)), AuxEntry::object(identifier)]),
            true,
        )?;

        let (value, _aux) = self.recv_message()?;
        if !matches!(value, None | Some(Value::Null)) {
            return Err(DtxError::Handshake(format!(
                "expected a null reply to channel creation, got {value:?}"
            )));
        }

        let handle = ChannelHandle { code, identifier: identifier.to_string() };
        self.channels.insert(identifier.to_string(), handle.clone());
        Ok(handle)
    }

    /// Build and send one message: pre-increments `next_identifier`, then
    /// writes the frame header and payload to the transport in one call.
    pub fn send_message(
        &mut self,
        channel_code: i32,
        selector: Option<&str>,
        aux: Option<&[AuxEntry]>,
        expects_reply: bool,
    ) -> Result<()> {
        self.next_identifier += 1;
        let payload_bytes = payload::encode_payload(selector, aux, expects_reply)?;
        let header =
            FrameHeader::build(channel_code, self.next_identifier, payload_bytes.len() as u32, expects_reply);

        self.transport.send_all(&header.to_bytes()).map_err(DtxError::Transport)?;
        self.transport.send_all(&payload_bytes).map_err(DtxError::Transport)?;
        Ok(())
    }

    /// Read and decode one logical (possibly fragmented) inbound message.
    pub fn recv_message(&mut self) -> Result<(Option<Value>, Option<Vec<AuxEntry>>)> {
        let (header, payload_bytes) = self.read_message()?;

        if header.identifier() >= self.next_identifier {
            self.next_identifier = header.identifier();
        }

        let decoded = payload::decode_payload(&payload_bytes, &self.registry)?;
        Ok((decoded.value, decoded.aux))
    }

    /// Read one logical message off the transport, reassembling fragments.
    fn read_message(&mut self) -> Result<(FrameHeader, Vec<u8>)> {
        let first = self.read_header()?;

        if !first.is_header_only_lead_fragment() {
            let payload_bytes =
                self.transport.recv_exact(first.length() as usize).map_err(DtxError::Transport)?;
            return Ok((first, payload_bytes));
        }

        let mut payload_bytes = Vec::new();
        let mut previous = first;
        loop {
            let next = self.read_header()?;
            previous.check_continues(&next)?;

            let chunk = self.transport.recv_exact(next.length() as usize).map_err(DtxError::Transport)?;
            payload_bytes.extend_from_slice(&chunk);

            if next.is_last_fragment() {
                return Ok((first, payload_bytes));
            }
            previous = next;
        }
    }

    fn read_header(&mut self) -> Result<FrameHeader> {
        let bytes = self.transport.recv_exact(FrameHeader::SIZE).map_err(DtxError::Transport)?;
        FrameHeader::parse(&bytes).map_err(DtxError::from)
    }
}

#[cfg(test)]
mod tests {
    use dtx_harness::MockTransport;

    use super::*;

    #[test]
    fn send_message_assigns_strictly_increasing_identifiers() {
        let mut session = Session::new(MockTransport::new());

        for _ in 0..5 {
            session.send_message(0, None, None, false).unwrap();
        }

        let sent = session.transport.sent_frames();
        let identifiers: Vec<u32> = sent.iter().map(|(header, _)| header.identifier()).collect();
        assert_eq!(identifiers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn recv_message_raises_next_identifier_to_the_peers_observed_value() {
        let mut transport = MockTransport::new();
        let empty_payload = payload::encode_payload(None, None, false).unwrap();
        transport.push_frame(0, 100, &empty_payload, false);
        let mut session = Session::new(transport);

        session.recv_message().unwrap();
        assert_eq!(session.next_identifier, 100);

        session.send_message(0, None, None, false).unwrap();
        let sent = session.transport.sent_frames();
        assert_eq!(sent.last().unwrap().0.identifier(), 101);
    }
}
