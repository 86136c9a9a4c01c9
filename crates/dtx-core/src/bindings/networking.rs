//! The `networking` service: a live stream of interface/connection events.
//!
//! # Close semantics
//!
//! The original tool sends `stopMonitoring` from inside a generator's
//! `finally` block, which (because of how Python generators unwind)
//! actually fires after *every* yielded event rather than once at stream
//! end — almost certainly unintended. This core does not reproduce that:
//! [`NetworkMonitor`] only sends `stopMonitoring` when the caller calls
//! [`NetworkMonitor::close`] explicitly, or when the cursor is dropped.
//!
//! A null reply from the channel is unrelated to closing the stream — see
//! [`NetworkMonitor::next_event`].

use dtx_proto::archive::Value;

use crate::{
    channel::ChannelProxy,
    error::{DtxError, Result},
    session::Session,
    transport::Transport,
};

const SERVICE_IDENTIFIER: &str = "networking";

/// One event observed on a [`NetworkMonitor`] stream.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// A network interface was detected.
    InterfaceDetection {
        /// Kernel interface index.
        interface_index: i64,
        /// Interface name (e.g. `en0`).
        name: String,
    },
    /// A new connection was detected.
    ConnectionDetection {
        /// Local endpoint.
        local_address: SocketAddrRecord,
        /// Remote endpoint.
        remote_address: SocketAddrRecord,
        /// Kernel interface index the connection is using.
        interface_index: i64,
        /// Owning process id.
        pid: i64,
        /// Receive-buffer size, in bytes.
        recv_buffer_size: i64,
        /// Receive-buffer bytes currently in use.
        recv_buffer_used: i64,
        /// Kernel connection serial number, used to correlate later updates.
        serial_number: i64,
        /// Connection kind (protocol-specific).
        kind: i64,
    },
    /// A periodic statistics update for a previously-detected connection.
    ConnectionUpdate {
        /// Packets received.
        rx_packets: i64,
        /// Bytes received.
        rx_bytes: i64,
        /// Bytes transmitted.
        tx_bytes: i64,
        /// Duplicate packets received.
        rx_dups: i64,
        /// Out-of-order packets received.
        rx_out_of_order: i64,
        /// Retransmitted packets sent.
        tx_retransmits: i64,
        /// Minimum observed round-trip time.
        min_rtt: i64,
        /// Average observed round-trip time.
        avg_rtt: i64,
        /// Connection serial number this update refers to.
        connection_serial: i64,
    },
}

/// A parsed `sockaddr`-like endpoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketAddrRecord {
    /// An IPv4 endpoint.
    V4 {
        /// Port, host byte order.
        port: u16,
        /// Four-byte address.
        addr: [u8; 4],
    },
    /// An IPv6 endpoint.
    V6 {
        /// Port, host byte order.
        port: u16,
        /// IPv6 flow info.
        flow_info: u32,
        /// Sixteen-byte address.
        addr: [u8; 16],
        /// IPv6 scope id.
        scope_id: u32,
    },
}

impl<T: Transport> Session<T> {
    /// Start a live network-event stream. The stream starts sending events
    /// immediately; call [`NetworkMonitor::next_event`] to consume them.
    pub fn network_monitor(&mut self) -> Result<NetworkMonitor<'_, T>> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);
        proxy.invoke(self, "startMonitoring", &[], false)?;
        Ok(NetworkMonitor { session: self, channel: proxy, closed: false })
    }
}

/// A pull-based cursor over [`NetworkEvent`]s. Sends `stopMonitoring` on
/// [`Self::close`] or on drop, whichever comes first.
pub struct NetworkMonitor<'session, T: Transport> {
    session: &'session mut Session<T>,
    channel: ChannelProxy,
    closed: bool,
}

impl<'session, T: Transport> NetworkMonitor<'session, T> {
    /// Block for the next event.
    ///
    /// A null reply is not an end-of-stream signal: the original tool's
    /// `network_monitor` loop does `if message is None: continue`, so a null
    /// reply is skipped and the next one is awaited instead. Nothing in this
    /// protocol gives a live [`NetworkMonitor`] an explicit close signal —
    /// the channel only ever stops producing events when the underlying
    /// transport errors, which surfaces as `Err`.
    pub fn next_event(&mut self) -> Result<NetworkEvent> {
        loop {
            match self.channel.receive(self.session)? {
                None | Some(Value::Null) => continue,
                Some(value) => return decode_event(value),
            }
        }
    }

    /// Stop the stream. Idempotent; safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel.invoke(self.session, "stopMonitoring", &[], false)
    }
}

impl<'session, T: Transport> Drop for NetworkMonitor<'session, T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to send stopMonitoring while dropping network monitor");
        }
    }
}

fn decode_event(value: Value) -> Result<NetworkEvent> {
    let Value::Array(pair) = value else {
        return Err(DtxError::Domain(format!("network monitor event was not a tagged pair: {value:?}")));
    };
    let [tag, fields] = <[Value; 2]>::try_from(pair)
        .map_err(|pair| DtxError::Domain(format!("network monitor event had {} elements, want 2", pair.len())))?;

    let tag = as_int(&tag, "event tag")?;
    let Value::Array(fields) = fields else {
        return Err(DtxError::Domain("network monitor event payload was not an array".to_string()));
    };

    match tag {
        0 => {
            let [interface_index, name] = take_fields(fields)?;
            Ok(NetworkEvent::InterfaceDetection {
                interface_index: as_int(&interface_index, "interface_index")?,
                name: as_string(name, "name")?,
            })
        },
        1 => {
            let [
                local_address,
                remote_address,
                interface_index,
                pid,
                recv_buffer_size,
                recv_buffer_used,
                serial_number,
                kind,
            ] = take_fields(fields)?;
            Ok(NetworkEvent::ConnectionDetection {
                local_address: parse_sockaddr(&as_string(local_address, "local_address")?)?,
                remote_address: parse_sockaddr(&as_string(remote_address, "remote_address")?)?,
                interface_index: as_int(&interface_index, "interface_index")?,
                pid: as_int(&pid, "pid")?,
                recv_buffer_size: as_int(&recv_buffer_size, "recv_buffer_size")?,
                recv_buffer_used: as_int(&recv_buffer_used, "recv_buffer_used")?,
                serial_number: as_int(&serial_number, "serial_number")?,
                kind: as_int(&kind, "kind")?,
            })
        },
        2 => {
            let [
                rx_packets,
                rx_bytes,
                tx_bytes,
                rx_dups,
                rx_out_of_order,
                tx_retransmits,
                min_rtt,
                avg_rtt,
                connection_serial,
            ] = take_fields(fields)?;
            Ok(NetworkEvent::ConnectionUpdate {
                rx_packets: as_int(&rx_packets, "rx_packets")?,
                rx_bytes: as_int(&rx_bytes, "rx_bytes")?,
                tx_bytes: as_int(&tx_bytes, "tx_bytes")?,
                rx_dups: as_int(&rx_dups, "rx_dups")?,
                rx_out_of_order: as_int(&rx_out_of_order, "rx_out_of_order")?,
                tx_retransmits: as_int(&tx_retransmits, "tx_retransmits")?,
                min_rtt: as_int(&min_rtt, "min_rtt")?,
                avg_rtt: as_int(&avg_rtt, "avg_rtt")?,
                connection_serial: as_int(&connection_serial, "connection_serial")?,
            })
        },
        other => Err(DtxError::Domain(format!("unknown network monitor event tag {other}"))),
    }
}

fn take_fields<const N: usize>(fields: Vec<Value>) -> Result<[Value; N]> {
    let len = fields.len();
    <[Value; N]>::try_from(fields)
        .map_err(|_| DtxError::Domain(format!("network monitor event had {len} fields, want {N}")))
}

fn as_int(value: &Value, field: &str) -> Result<i64> {
    value.as_int().ok_or_else(|| DtxError::Domain(format!("{field} was not an integer: {value:?}")))
}

fn as_string(value: Value, field: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(DtxError::Domain(format!("{field} was not a string: {other:?}"))),
    }
}

/// Parse a `sockaddr`-like record out of the raw byte string the peer sends.
///
/// Bytes travel as a [`Value::String`] whose characters are a 1:1 Latin-1
/// mapping of the original byte values (exactly what the keyed-archive
/// string codec round-trips for any byte in `0..=255`), so the original
/// bytes are recovered with a straight `u32 as u8` cast.
fn parse_sockaddr(raw: &str) -> Result<SocketAddrRecord> {
    let bytes: Vec<u8> = raw
        .chars()
        .map(|c| u8::try_from(c as u32))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| DtxError::Domain("sockaddr record contained a non-byte character".to_string()))?;

    let declared_len = *bytes.first().ok_or_else(|| DtxError::Domain("empty sockaddr record".to_string()))? as usize;
    if bytes.len() < declared_len {
        return Err(DtxError::Domain(format!(
            "sockaddr record declared length {declared_len} but only has {} bytes",
            bytes.len()
        )));
    }
    let port = u16::from_be_bytes([bytes[2], bytes[3]]);

    match declared_len {
        0x10 => {
            let mut addr = [0u8; 4];
            addr.copy_from_slice(&bytes[4..8]);
            Ok(SocketAddrRecord::V4 { port, addr })
        },
        0x1c => {
            let flow_info = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
            let mut addr = [0u8; 16];
            addr.copy_from_slice(&bytes[8..24]);
            let scope_id = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
            Ok(SocketAddrRecord::V6 { port, flow_info, addr, scope_id })
        },
        other => Err(DtxError::Domain(format!("unsupported sockaddr length {other:#x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_to_value(bytes: &[u8]) -> Value {
        Value::String(bytes.iter().map(|&b| b as char).collect())
    }

    #[test]
    fn parses_ipv4_sockaddr() {
        let mut bytes = vec![0x10, 0x02, 0x1f, 0x90]; // len, family, port=8080
        bytes.extend_from_slice(&[10, 0, 0, 1]);
        bytes.extend_from_slice(&[0u8; 8]);
        let record = parse_sockaddr(bytes_to_value(&bytes).as_str().unwrap()).unwrap();
        assert_eq!(record, SocketAddrRecord::V4 { port: 8080, addr: [10, 0, 0, 1] });
    }

    #[test]
    fn parses_ipv6_sockaddr() {
        let mut bytes = vec![0x1c, 0x1e, 0x00, 0x50]; // len, family, port=80
        bytes.extend_from_slice(&0u32.to_be_bytes()); // flow_info
        bytes.extend_from_slice(&[0u8; 15]);
        bytes.push(1); // ::1
        bytes.extend_from_slice(&0u32.to_be_bytes()); // scope_id
        let record = parse_sockaddr(bytes_to_value(&bytes).as_str().unwrap()).unwrap();
        let mut expected_addr = [0u8; 16];
        expected_addr[15] = 1;
        assert_eq!(record, SocketAddrRecord::V6 { port: 80, flow_info: 0, addr: expected_addr, scope_id: 0 });
    }

    #[test]
    fn decodes_interface_detection_event() {
        let value = Value::Array(vec![
            Value::Int(0),
            Value::Array(vec![Value::Int(4), Value::String("en0".to_string())]),
        ]);
        let event = decode_event(value).unwrap();
        assert_eq!(event, NetworkEvent::InterfaceDetection { interface_index: 4, name: "en0".to_string() });
    }

    #[test]
    fn rejects_unknown_event_tag() {
        let value = Value::Array(vec![Value::Int(9), Value::Array(vec![])]);
        assert!(decode_event(value).is_err());
    }
}
