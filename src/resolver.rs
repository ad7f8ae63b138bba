//! Name resolution for transport flows.
//!
//! TLS flows never resolve anything themselves; the resolver is a
//! collaborator of the transport flows below them. Results are delivered
//! through the runloop like every other completion in this crate.

use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::rc::Rc;

use log::debug;

use crate::error::FlowError;
use crate::runloop::Runloop;

/// Which address families to resolve, and in which order to try them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddressPreference {
    /// IPv4 addresses only.
    Ipv4Only,
    /// IPv6 addresses only.
    Ipv6Only,
    /// Both families, IPv4 first.
    Ipv4OrIpv6,
    /// Both families, IPv6 first.
    Ipv6OrIpv4,
    /// Both families in resolver order.
    Any,
}

/// Completion handler for a resolution.
pub type ResolveHandler = Box<dyn FnOnce(Result<Vec<IpAddr>, FlowError>)>;

/// An asynchronous name resolver.
pub trait Resolver {
    /// Resolves `domain`, filters and orders the addresses according to
    /// `preference`, and posts the result to the handler. Resolving to
    /// no usable address is an error.
    fn resolve(&mut self, domain: &str, preference: AddressPreference, handler: ResolveHandler);
}

/// Resolver backed by the platform's `getaddrinfo` via
/// [`std::net::ToSocketAddrs`].
pub struct SystemResolver {
    runloop: Rc<Runloop>,
}

impl SystemResolver {
    /// A resolver posting its results to the given runloop.
    pub fn new(runloop: Rc<Runloop>) -> SystemResolver {
        SystemResolver { runloop }
    }
}

impl Resolver for SystemResolver {
    fn resolve(&mut self, domain: &str, preference: AddressPreference, handler: ResolveHandler) {
        debug!("resolving {} ({:?})", domain, preference);
        let result = (domain, 0u16)
            .to_socket_addrs()
            .map(|addrs| order_addresses(addrs.map(|a| a.ip()).collect(), preference))
            .map_err(FlowError::Io)
            .and_then(|addrs| {
                if addrs.is_empty() {
                    Err(FlowError::Io(io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        "no address matched the preference",
                    )))
                } else {
                    Ok(addrs)
                }
            });
        self.runloop.post(move || handler(result));
    }
}

/// Filters and orders resolved addresses according to the preference.
pub fn order_addresses(addrs: Vec<IpAddr>, preference: AddressPreference) -> Vec<IpAddr> {
    if let AddressPreference::Any = preference {
        return addrs;
    }
    let (v4, v6): (Vec<IpAddr>, Vec<IpAddr>) = addrs.into_iter().partition(|a| a.is_ipv4());
    match preference {
        AddressPreference::Ipv4Only => v4,
        AddressPreference::Ipv6Only => v6,
        AddressPreference::Ipv4OrIpv6 => v4.into_iter().chain(v6).collect(),
        AddressPreference::Ipv6OrIpv4 | AddressPreference::Any => {
            v6.into_iter().chain(v4).collect()
        }
    }
}
