//! Channel handles and the selector-sanitization rule.

use dtx_proto::AuxEntry;

use crate::{error::Result, session::Session, transport::Transport};

/// The result of [`Session::make_channel`]: a channel code bound to the
/// service identifier that created it.
///
/// Cheap to clone; holds no reference to the session it came from (the
/// session table is the only owner of channel state — see §5's "non-owning
/// back-reference" requirement).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub(crate) code: i32,
    pub(crate) identifier: String,
}

impl ChannelHandle {
    /// The channel code allocated for this identifier.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The service identifier this channel was opened for.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// A thin, stateless proxy for invoking selectors on one channel.
///
/// `ChannelProxy` holds nothing but the numeric code; every call borrows the
/// session it belongs to explicitly rather than storing a reference to it,
/// so there is no lifetime to enforce beyond the call itself.
pub struct ChannelProxy {
    code: i32,
}

impl ChannelProxy {
    /// Build a proxy for the channel `handle` identifies.
    #[must_use]
    pub fn new(handle: &ChannelHandle) -> Self {
        Self { code: handle.code }
    }

    /// Send `selector` (already wire-ready — see [`sanitize_selector`] if it
    /// needs translating from the underscore convenience form) with
    /// positional auxiliary `args` on this channel.
    pub fn invoke<T: Transport>(
        &self,
        session: &mut Session<T>,
        selector: &str,
        args: &[AuxEntry],
        expects_reply: bool,
    ) -> Result<()> {
        let aux = if args.is_empty() { None } else { Some(args) };
        session.send_message(self.code, Some(selector), aux, expects_reply)
    }

    /// Receive one reply on this channel, discarding any auxiliary entries.
    pub fn receive<T: Transport>(&self, session: &mut Session<T>) -> Result<Option<dtx_proto::Value>> {
        let (value, _aux) = session.recv_message()?;
        Ok(value)
    }
}

/// Translate a caller-provided, underscore-punctuated selector name into its
/// wire form: a single leading underscore is preserved, every other
/// underscore becomes `:`.
///
/// ```
/// use dtx_core::channel::sanitize_selector;
/// assert_eq!(sanitize_selector("killPid_"), "killPid:");
/// assert_eq!(sanitize_selector("_notifyOfPublishedCapabilities_"), "_notifyOfPublishedCapabilities:");
/// assert_eq!(sanitize_selector("foo_bar_baz_"), "foo:bar:baz:");
/// ```
#[must_use]
pub fn sanitize_selector(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();

    if chars.peek() == Some(&'_') {
        out.push('_');
        chars.next();
    }

    for c in chars {
        out.push(if c == '_' { ':' } else { c });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_underscore_is_preserved() {
        assert_eq!(
            sanitize_selector("_notifyOfPublishedCapabilities_"),
            "_notifyOfPublishedCapabilities:"
        );
    }

    #[test]
    fn other_underscores_become_colons() {
        assert_eq!(sanitize_selector("killPid_"), "killPid:");
        assert_eq!(sanitize_selector("foo_bar_baz_"), "foo:bar:baz:");
    }

    #[test]
    fn no_underscores_is_unchanged() {
        assert_eq!(sanitize_selector("runningProcesses"), "runningProcesses");
    }
}
