//! The `deviceinfo` service: directory listing, process inspection, and the
//! system/hardware/network attribute dumps.

use dtx_proto::archive::Value;

use super::{unexpected_reply, unix_seconds_to_date};
use crate::{
    channel::ChannelProxy,
    error::{DtxError, Result},
    session::Session,
    transport::Transport,
};

const SERVICE_IDENTIFIER: &str = "deviceinfo";

impl<T: Transport> Session<T> {
    /// List the contents of `path` on the peer.
    ///
    /// # Errors
    ///
    /// [`DtxError::Domain`] if the peer returns null (path does not exist or
    /// isn't a directory) or anything other than a list of strings.
    pub fn ls(&mut self, path: &str) -> Result<Vec<String>> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);
        proxy.invoke(self, "directoryListingForPath:", &[dtx_proto::aux::AuxEntry::object(path)], true)?;

        match proxy.receive(self)? {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name),
                    other => Err(DtxError::Domain(format!("directory entry was not a string: {other:?}"))),
                })
                .collect(),
            None => Err(DtxError::Domain(format!("directoryListingForPath: returned null for {path:?}"))),
            other => Err(unexpected_reply("ls", &other)),
        }
    }

    /// Look up the executable name for a running process.
    pub fn exec_name_for_pid(&mut self, pid: i64) -> Result<String> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);
        proxy.invoke(self, "execnameForPid:", &[dtx_proto::aux::AuxEntry::Int64(pid)], true)?;

        match proxy.receive(self)? {
            Some(Value::String(name)) => Ok(name),
            other => Err(unexpected_reply("exec_name_for_pid", &other)),
        }
    }

    /// List all running processes, each as an ordered attribute map with
    /// `startDate` (if present) converted from Unix seconds to a
    /// [`Value::Date`].
    pub fn proc_list(&mut self) -> Result<Vec<Vec<(String, Value)>>> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);
        proxy.invoke(self, "runningProcesses", &[], true)?;

        match proxy.receive(self)? {
            Some(Value::Array(procs)) => procs
                .into_iter()
                .map(|entry| match entry {
                    Value::Dict(fields) => Ok(fields
                        .into_iter()
                        .map(|(key, value)| {
                            let value = if key == "startDate" { unix_seconds_to_date(value) } else { value };
                            (key, value)
                        })
                        .collect()),
                    other => Err(DtxError::Domain(format!("process entry was not a dict: {other:?}"))),
                })
                .collect(),
            other => Err(unexpected_reply("proc_list", &other)),
        }
    }

    /// Fetch the named system attribute dump (`systemInformation`).
    pub fn system_information(&mut self) -> Result<Vec<(String, Value)>> {
        self.fetch_attribute_map("systemInformation")
    }

    /// Fetch the named hardware attribute dump (`hardwareInformation`).
    pub fn hardware_information(&mut self) -> Result<Vec<(String, Value)>> {
        self.fetch_attribute_map("hardwareInformation")
    }

    /// Fetch the named network attribute dump (`networkInformation`).
    pub fn network_information(&mut self) -> Result<Vec<(String, Value)>> {
        self.fetch_attribute_map("networkInformation")
    }

    /// Fetch the attribute names `sysmontap`'s config map advertises as
    /// `procAttrs`, caching them on the session (`sysmonProcessAttributes`).
    pub fn sysmon_process_attributes(&mut self) -> Result<Vec<String>> {
        let attrs = self.fetch_attribute_names("sysmonProcessAttributes")?;
        self.set_process_attributes(attrs.clone());
        Ok(attrs)
    }

    /// Fetch the attribute names `sysmontap`'s config map advertises as
    /// `sysAttrs`, caching them on the session (`sysmonSystemAttributes`).
    pub fn sysmon_system_attributes(&mut self) -> Result<Vec<String>> {
        let attrs = self.fetch_attribute_names("sysmonSystemAttributes")?;
        self.set_system_attributes(attrs.clone());
        Ok(attrs)
    }

    fn fetch_attribute_map(&mut self, selector: &str) -> Result<Vec<(String, Value)>> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);
        proxy.invoke(self, selector, &[], true)?;

        match proxy.receive(self)? {
            Some(Value::Dict(fields)) => Ok(fields),
            other => Err(unexpected_reply(selector, &other)),
        }
    }

    fn fetch_attribute_names(&mut self, selector: &str) -> Result<Vec<String>> {
        let handle = self.make_channel(SERVICE_IDENTIFIER)?;
        let proxy = ChannelProxy::new(&handle);
        proxy.invoke(self, selector, &[], true)?;

        match proxy.receive(self)? {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name),
                    other => Err(DtxError::Domain(format!("attribute name was not a string: {other:?}"))),
                })
                .collect(),
            other => Err(unexpected_reply(selector, &other)),
        }
    }
}
