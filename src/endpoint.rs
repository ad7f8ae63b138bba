//! Remote endpoint description.

use std::fmt;
use std::net::IpAddr;

/// A remote endpoint: host name, port, and optionally the addresses it
/// resolved to. Immutable once a connect begins.
#[derive(Clone, Debug)]
pub struct Endpoint {
    host: String,
    port: u16,
    addresses: Vec<IpAddr>,
}

impl Endpoint {
    /// An endpoint that has not been resolved yet.
    pub fn new(host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint {
            host: host.into(),
            port,
            addresses: Vec::new(),
        }
    }

    /// Attaches resolved addresses, in connection-attempt order.
    pub fn with_addresses(mut self, addresses: Vec<IpAddr>) -> Endpoint {
        self.addresses = addresses;
        self
    }

    /// The host name. Also used as SNI and certificate-validation name
    /// by TLS flows.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The resolved addresses, empty if resolution has not happened.
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
