//! The transport seam: a synchronous, ordered, reliable byte stream the core
//! reads frames from and writes frames to.
//!
//! The core never opens a socket itself — `connect_to_developer_server`
//! generically drives whatever `ServiceOpener` the pairing layer supplies,
//! so the bring-up of the underlying (TLS-wrapped) connection stays an
//! external collaborator's responsibility.

use std::io;

/// A live, already-authenticated byte stream to the developer server.
///
/// Implementations are expected to block until exactly `n` bytes have been
/// read (or return an error), mirroring the original pairing layer's
/// `recv_exact` contract.
pub trait Transport {
    /// Write `buf` in full.
    fn send_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Read exactly `n` bytes, blocking until they're all available.
    fn recv_exact(&mut self, n: usize) -> io::Result<Vec<u8>>;

    /// Tear down an already-negotiated TLS layer on the underlying socket.
    ///
    /// Only meaningful after the non-`DVTSecureSocketProxy` service name is
    /// used; the default no-op is correct for any transport that was never
    /// TLS-wrapped to begin with.
    fn disable_tls(&mut self) {}
}

/// The two developer-server service names the core knows to try, in order.
pub const SECURE_SERVICE_NAME: &str = "com.apple.instruments.remoteserver.DVTSecureSocketProxy";

/// Fallback service name used when the secure variant isn't available; a
/// transport opened under this name must have its TLS layer torn down.
pub const PLAIN_SERVICE_NAME: &str = "com.apple.instruments.remoteserver";

/// Opens a transport for a named lockdown service. Supplied by the pairing
/// layer; failure (e.g. the service doesn't exist on this peer) is reported
/// as an `io::Error` so `connect_to_developer_server` can fall back.
pub trait ServiceOpener<T: Transport> {
    /// Attempt to open `service_name`.
    fn open(&mut self, service_name: &str) -> io::Result<T>;
}

impl<T: Transport, F: FnMut(&str) -> io::Result<T>> ServiceOpener<T> for F {
    fn open(&mut self, service_name: &str) -> io::Result<T> {
        self(service_name)
    }
}

/// Open a connection to the developer server, trying the secure service name
/// first and falling back to the plain one (disabling TLS) if that fails.
///
/// # Errors
///
/// The plain-service `io::Error`, if both attempts fail.
pub fn connect_to_developer_server<T: Transport>(
    mut opener: impl ServiceOpener<T>,
) -> io::Result<T> {
    match opener.open(SECURE_SERVICE_NAME) {
        Ok(transport) => Ok(transport),
        Err(secure_err) => {
            tracing::debug!(
                error = %secure_err,
                "secure developer-server service unavailable, falling back to plain"
            );
            let mut transport = opener.open(PLAIN_SERVICE_NAME)?;
            transport.disable_tls();
            Ok(transport)
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct StubTransport {
        tls_disabled: bool,
    }

    impl Transport for StubTransport {
        fn send_all(&mut self, _buf: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn recv_exact(&mut self, _n: usize) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn disable_tls(&mut self) {
            self.tls_disabled = true;
        }
    }

    #[test]
    fn secure_service_succeeds_without_falling_back() {
        let transport = connect_to_developer_server(|name: &str| -> io::Result<StubTransport> {
            assert_eq!(name, SECURE_SERVICE_NAME);
            Ok(StubTransport { tls_disabled: false })
        })
        .unwrap();
        assert!(!transport.tls_disabled);
    }

    #[test]
    fn secure_service_failure_falls_back_and_disables_tls() {
        let attempts = Cell::new(0);
        let transport = connect_to_developer_server(|name: &str| -> io::Result<StubTransport> {
            attempts.set(attempts.get() + 1);
            if name == SECURE_SERVICE_NAME {
                Err(io::Error::new(io::ErrorKind::NotFound, "no such service"))
            } else {
                assert_eq!(name, PLAIN_SERVICE_NAME);
                Ok(StubTransport { tls_disabled: false })
            }
        })
        .unwrap();
        assert_eq!(attempts.get(), 2);
        assert!(transport.tls_disabled);
    }

    #[test]
    fn both_failing_surfaces_the_plain_service_error() {
        let result = connect_to_developer_server(|_: &str| -> io::Result<StubTransport> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "nope"))
        });
        assert!(result.is_err());
    }
}
