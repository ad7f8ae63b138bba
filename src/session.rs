//! Shared per-connection request context.

use crate::resolver::AddressPreference;

/// Immutable context shared by every stage of one proxied connection.
///
/// Flows hold it by `Rc` and never mutate it; it identifies the
/// requesting peer and carries the options stages consult when making
/// transport decisions.
#[derive(Debug)]
pub struct Session {
    peer: String,
    preference: AddressPreference,
}

impl Session {
    /// A session for the given requesting peer, with [`AddressPreference::Any`].
    pub fn new(peer: impl Into<String>) -> Session {
        Session {
            peer: peer.into(),
            preference: AddressPreference::Any,
        }
    }

    /// Sets the address family preference transport flows should use
    /// when resolving for this session.
    pub fn with_preference(mut self, preference: AddressPreference) -> Session {
        self.preference = preference;
        self
    }

    /// Identity of the requesting peer.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// The resolve preference for this session.
    pub fn preference(&self) -> AddressPreference {
        self.preference
    }
}
