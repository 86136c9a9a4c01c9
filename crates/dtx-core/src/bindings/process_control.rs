//! The `processcontrol` service: killing and launching processes.

use dtx_proto::{archive::Value, aux::AuxEntry};

use super::unexpected_reply;
use crate::{channel::ChannelProxy, error::Result, session::Session, transport::Transport};

const SERVICE_IDENTIFIER: &str = "processcontrol";

impl<T: Transport> Session<T> {
    /// Kill a running process by pid. Fire-and-forget: the peer does not
    /// reply to this selector.
    pub fn kill(&mut self, pid: i64) -> Result<()> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);
        proxy.invoke(self, "killPid:", &[AuxEntry::object(Value::Int(pid))], false)
    }

    /// Launch `bundle_id` at `device_path`, returning its pid.
    ///
    /// # Errors
    ///
    /// [`crate::error::DtxError::Domain`] if the peer returns a falsy
    /// (zero/null) pid.
    pub fn launch(
        &mut self,
        bundle_id: &str,
        arguments: &[String],
        kill_existing: bool,
        start_suspended: bool,
    ) -> Result<i64> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);

        let argument_values = Value::Array(arguments.iter().map(|arg| Value::String(arg.clone())).collect());
        let options = Value::Dict(vec![
            ("StartSuspendedKey".to_string(), Value::Bool(start_suspended)),
            ("KillExisting".to_string(), Value::Bool(kill_existing)),
        ]);

        let args = [
            AuxEntry::object(Value::String(String::new())),
            AuxEntry::object(Value::String(bundle_id.to_string())),
            AuxEntry::object(Value::Dict(Vec::new())),
            AuxEntry::object(argument_values),
            AuxEntry::object(options),
        ];

        proxy.invoke(
            self,
            "launchSuspendedProcessWithDevicePath:bundleIdentifier:environment:arguments:options:",
            &args,
            true,
        )?;

        match proxy.receive(self)? {
            Some(Value::Int(pid)) if pid != 0 => Ok(pid),
            other => Err(unexpected_reply("launch", &other)),
        }
    }
}
