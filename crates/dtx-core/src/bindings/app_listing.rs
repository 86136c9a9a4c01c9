//! The application-listing service (note: its wire identifier carries the
//! upstream misspelling `applictionListing`, preserved here since it's part
//! of the wire contract, not a typo to fix).

use dtx_proto::{archive::Value, aux::AuxEntry};

use super::unexpected_reply;
use crate::{channel::ChannelProxy, error::Result, session::Session, transport::Transport};

const SERVICE_IDENTIFIER: &str = "device.applictionListing";

impl<T: Transport> Session<T> {
    /// List installed applications.
    pub fn app_list(&mut self) -> Result<Vec<Vec<(String, Value)>>> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);

        let args =
            [AuxEntry::object(Value::Dict(Vec::new())), AuxEntry::object(Value::String(String::new()))];
        proxy.invoke(self, "installedApplicationsMatching:registerUpdateToken:", &args, true)?;

        match proxy.receive(self)? {
            Some(Value::Array(apps)) => apps
                .into_iter()
                .map(|entry| match entry {
                    Value::Dict(fields) => Ok(fields),
                    other => Err(crate::error::DtxError::Domain(format!(
                        "application entry was not a dict: {other:?}"
                    ))),
                })
                .collect(),
            other => Err(unexpected_reply("app_list", &other)),
        }
    }
}
