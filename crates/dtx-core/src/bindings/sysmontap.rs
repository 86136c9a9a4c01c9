//! The `sysmontap` service: a generic telemetry tap yielding raw decoded
//! records (CPU/memory/process samples), configured from the attribute
//! names `sysmon_process_attributes`/`sysmon_system_attributes` fetched
//! beforehand.

use dtx_proto::archive::Value;

use crate::{
    channel::ChannelProxy,
    error::Result,
    session::Session,
    transport::Transport,
};

const SERVICE_IDENTIFIER: &str = "com.apple.instruments.server.services.sysmontap";

/// Sampling interval, in nanoseconds, used for every tap this core opens.
const SAMPLE_INTERVAL_NANOS: i64 = 1_000_000_000;

/// Update rate, in milliseconds, advertised in the tap configuration.
const UPDATE_RATE_MILLIS: i64 = 1000;

impl<T: Transport> Session<T> {
    /// Open a sysmontap stream.
    ///
    /// Call [`Self::sysmon_process_attributes`] and
    /// [`Self::sysmon_system_attributes`] first — their results populate the
    /// `procAttrs`/`sysAttrs` entries of the configuration map this sends.
    pub fn sysmontap(&mut self) -> Result<SysmonTap<'_, T>> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);

        let config = Value::Dict(vec![
            ("ur".to_string(), Value::Int(UPDATE_RATE_MILLIS)),
            ("bm".to_string(), Value::Int(0)),
            (
                "procAttrs".to_string(),
                Value::Array(self.process_attributes().iter().cloned().map(Value::String).collect()),
            ),
            (
                "sysAttrs".to_string(),
                Value::Array(self.system_attributes().iter().cloned().map(Value::String).collect()),
            ),
            ("cpuUsage".to_string(), Value::Bool(true)),
            ("sampleInterval".to_string(), Value::Int(SAMPLE_INTERVAL_NANOS)),
        ]);

        proxy.invoke(self, "setConfig:", &[dtx_proto::aux::AuxEntry::object(config)], true)?;
        proxy.receive(self)?;

        proxy.invoke(self, "start", &[], false)?;

        Ok(SysmonTap { session: self, channel: proxy, closed: false })
    }
}

/// A pull-based cursor over raw sysmontap records.
pub struct SysmonTap<'session, T: Transport> {
    session: &'session mut Session<T>,
    channel: ChannelProxy,
    closed: bool,
}

impl<'session, T: Transport> SysmonTap<'session, T> {
    /// Block for the next raw record.
    ///
    /// A null reply is not an end-of-stream signal and not an error: it is
    /// skipped and the next record is awaited instead, matching the original
    /// tool's tolerance of `None` messages mid-stream. Nothing in this
    /// protocol gives a live [`SysmonTap`] an explicit close signal — the
    /// channel only ever stops producing records when the underlying
    /// transport errors, which surfaces as `Err`.
    pub fn next_record(&mut self) -> Result<Value> {
        loop {
            match self.channel.receive(self.session)? {
                None | Some(Value::Null) => continue,
                Some(value) => return Ok(value),
            }
        }
    }

    /// Stop the tap. Idempotent; safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel.invoke(self.session, "stop", &[], false)
    }
}

impl<'session, T: Transport> Drop for SysmonTap<'session, T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to send stop while dropping sysmontap cursor");
        }
    }
}
