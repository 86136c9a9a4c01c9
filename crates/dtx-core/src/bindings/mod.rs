//! Typed facades over [`crate::session::Session`]: one module per service
//! identifier, each binding following the same shape —
//! `make_channel → send_message → recv_message → decode the return value`.

pub mod app_listing;
pub mod device_info;
pub mod networking;
pub mod process_control;
pub mod sysmontap;

use dtx_proto::archive::Value;

use crate::error::DtxError;

/// Seconds between the Unix epoch (1970-01-01) and the Mac absolute epoch
/// (2001-01-01), used to translate `startDate`-style Unix-second fields into
/// the same epoch [`Value::Date`] uses elsewhere in the keyed-archive
/// contract.
const MAC_EPOCH_OFFSET_SECONDS: f64 = 978_307_200.0;

/// Convert a raw Unix-seconds number into a [`Value::Date`] in the Mac
/// absolute epoch. Non-numeric input is returned unchanged.
fn unix_seconds_to_date(value: Value) -> Value {
    match value {
        Value::Int(unix) => {
            #[allow(clippy::cast_precision_loss)]
            Value::Date(unix as f64 - MAC_EPOCH_OFFSET_SECONDS)
        },
        Value::Double(unix) => Value::Date(unix - MAC_EPOCH_OFFSET_SECONDS),
        other => other,
    }
}

/// Build a [`DtxError::Domain`] for "the reply wasn't the shape this binding
/// expected".
fn unexpected_reply(binding: &str, value: &Option<Value>) -> DtxError {
    DtxError::Domain(format!("{binding} received an unexpected reply: {value:?}"))
}
