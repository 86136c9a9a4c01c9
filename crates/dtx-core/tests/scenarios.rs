//! End-to-end scenarios driving a [`Session`] against a scripted
//! [`MockTransport`]: handshake, channel allocation, the `deviceinfo` and
//! `processcontrol` bindings (success and failure paths), and fragmented
//! receive.
//!
//! Every reply a scenario needs is queued on the transport up front — the
//! mock's inbound queue is a plain FIFO, so queuing order only has to match
//! the order `Session` will read frames in, not interleave with its writes.

use dtx_core::{DtxError, Session};
use dtx_harness::MockTransport;
use dtx_proto::{archive::Value, aux::AuxEntry, payload};

const HANDSHAKE_SELECTOR: &str = "_notifyOfPublishedCapabilities:";

fn capabilities(identifiers: &[&str]) -> Value {
    Value::Dict(identifiers.iter().map(|id| ((*id).to_string(), Value::Int(1))).collect())
}

/// Encode a reply payload carrying an archived return `value` (as opposed to
/// [`payload::encode_payload`], which only ever archives a selector string).
fn build_return_payload(value: Option<&Value>, aux: Option<&[AuxEntry]>) -> Vec<u8> {
    let aux_bytes = match aux {
        Some(entries) => dtx_proto::aux::encode(entries).unwrap(),
        None => Vec::new(),
    };
    let value_bytes = match value {
        Some(v) => dtx_proto::archive::encode(v).unwrap(),
        None => Vec::new(),
    };

    let mut out = Vec::with_capacity(16 + aux_bytes.len() + value_bytes.len());
    out.extend_from_slice(&payload::MESSAGE_TYPE_INSTRUMENTS.to_le_bytes());
    out.extend_from_slice(&(aux_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&((aux_bytes.len() + value_bytes.len()) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&aux_bytes);
    out.extend_from_slice(&value_bytes);
    out
}

/// Queue a null (no value, no aux) reply — the standard channel-creation ack.
fn push_null_reply(transport: &mut MockTransport, channel_code: i32, identifier: u32) {
    transport.push_frame(channel_code, identifier, &build_return_payload(None, None), false);
}

/// Queue a reply carrying `value` as its archived return.
fn push_value_reply(transport: &mut MockTransport, channel_code: i32, identifier: u32, value: &Value) {
    transport.push_frame(channel_code, identifier, &build_return_payload(Some(value), None), false);
}

fn new_handshaken_transport(identifiers: &[&str]) -> MockTransport {
    let mut transport = MockTransport::new();
    transport
        .push_reply(0, 1, Some(HANDSHAKE_SELECTOR), Some(&[AuxEntry::object(capabilities(identifiers))]), false)
        .unwrap();
    transport
}

#[test]
fn scenario_a_handshake_records_peer_capabilities() {
    let transport = new_handshaken_transport(&["deviceinfo", "processcontrol", "networking"]);
    let mut session = Session::new(transport);
    session.perform_handshake().unwrap();

    assert!(session.supported_identifiers().contains("deviceinfo"));
    assert!(session.supported_identifiers().contains("networking"));
    assert_eq!(session.supported_identifiers().len(), 3);
}

#[test]
fn scenario_a_handshake_rejects_a_mismatched_echoed_selector() {
    let mut transport = MockTransport::new();
    transport
        .push_reply(0, 1, Some("someOtherSelector:"), Some(&[AuxEntry::object(capabilities(&["deviceinfo"]))]), false)
        .unwrap();

    let mut session = Session::new(transport);
    assert!(session.perform_handshake().is_err());
}

#[test]
fn scenario_a_handshake_rejects_an_empty_capability_map() {
    let mut transport = MockTransport::new();
    transport.push_reply(0, 1, Some(HANDSHAKE_SELECTOR), Some(&[AuxEntry::object(Value::Dict(Vec::new()))]), false).unwrap();

    let mut session = Session::new(transport);
    assert!(session.perform_handshake().is_err());
}

#[test]
fn scenario_b_channel_allocation_caches_the_handle() {
    let mut transport = new_handshaken_transport(&["networking"]);
    push_null_reply(&mut transport, 0, 2);

    let mut session = Session::new(transport);
    session.perform_handshake().unwrap();

    let handle = session.make_channel("networking").unwrap();
    assert_eq!(handle.code(), 1);
    assert_eq!(handle.identifier(), "networking");

    // A second call for the same identifier must not touch the wire again.
    let cached = session.make_channel("networking").unwrap();
    assert_eq!(cached, handle);
}

#[test]
fn scenario_b_channel_allocation_rejects_an_unadvertised_identifier() {
    let transport = new_handshaken_transport(&["deviceinfo"]);
    let mut session = Session::new(transport);
    session.perform_handshake().unwrap();

    let err = session.make_channel("networking").unwrap_err();
    assert!(matches!(err, DtxError::ChannelNotAdvertised(id) if id == "networking"));
}

#[test]
fn scenario_c_ls_returns_the_directory_listing() {
    let mut transport = new_handshaken_transport(&["deviceinfo"]);
    push_null_reply(&mut transport, 0, 2); // channel creation ack
    push_value_reply(
        &mut transport,
        1,
        3,
        &Value::Array(vec![Value::String("Applications".to_string()), Value::String("Library".to_string())]),
    );

    let mut session = Session::new(transport);
    session.perform_handshake().unwrap();

    let entries = session.ls("/private/var").unwrap();
    assert_eq!(entries, vec!["Applications".to_string(), "Library".to_string()]);
}

#[test]
fn scenario_d_ls_on_a_missing_path_is_a_non_fatal_domain_error() {
    let mut transport = new_handshaken_transport(&["deviceinfo"]);
    push_null_reply(&mut transport, 0, 2);
    push_null_reply(&mut transport, 1, 3); // peer reports the path does not exist

    let mut session = Session::new(transport);
    session.perform_handshake().unwrap();

    let err = session.ls("/no/such/path").unwrap_err();
    assert!(matches!(err, DtxError::Domain(_)));
    assert!(!err.is_session_fatal());
}

#[test]
fn scenario_e_launch_returns_the_new_pid() {
    let mut transport = new_handshaken_transport(&["processcontrol"]);
    push_null_reply(&mut transport, 0, 2);
    push_value_reply(&mut transport, 1, 3, &Value::Int(4242));

    let mut session = Session::new(transport);
    session.perform_handshake().unwrap();

    let pid = session.launch("com.example.app", &[], false, false).unwrap();
    assert_eq!(pid, 4242);
}

#[test]
fn scenario_e_launch_rejects_a_zero_pid() {
    let mut transport = new_handshaken_transport(&["processcontrol"]);
    push_null_reply(&mut transport, 0, 2);
    push_value_reply(&mut transport, 1, 3, &Value::Int(0));

    let mut session = Session::new(transport);
    session.perform_handshake().unwrap();

    assert!(session.launch("com.example.app", &[], false, false).is_err());
}

#[test]
fn scenario_f_fragmented_receive_reassembles_and_advances_identifier() {
    let mut transport = new_handshaken_transport(&["deviceinfo"]);

    let payload_bytes = build_return_payload(None, Some(&[AuxEntry::object(Value::String("pong".to_string()))]));
    let mid = payload_bytes.len() / 2;
    let (first_half, second_half) = payload_bytes.split_at(mid);
    transport.push_fragmented(0, 9, &[first_half, second_half]);

    // The peer-observed identifier (9) overtakes this session's own counter
    // (1, bumped once by the handshake send) — the subsequent channel
    // creation must be sent tagged with an identifier above 9.
    push_null_reply(&mut transport, 0, 10);

    let mut session = Session::new(transport);
    session.perform_handshake().unwrap();

    let (value, aux) = session.recv_message().unwrap();
    assert_eq!(value, None);
    match aux {
        Some(entries) => assert_eq!(entries, vec![AuxEntry::object(Value::String("pong".to_string()))]),
        None => panic!("expected auxiliary entries to survive fragment reassembly"),
    }

    session.make_channel("deviceinfo").unwrap();
}
