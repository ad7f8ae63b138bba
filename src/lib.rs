//! Callback-driven TLS client flows
//!
//! This library layers TLS over any byte-stream transport in a
//! single-threaded, callback-driven pipeline. A [`TlsFlow`] owns an
//! opaque TLS engine (the [`Tunnel`]) and the transport flow below it,
//! performs the handshake against the remote endpoint across however
//! many transport round trips it takes, and thereafter transparently
//! encrypts writes and decrypts reads while exposing the same
//! [`DataFlow`] contract it consumes.
//!
//! Everything runs on one thread. Completions are delivered through a
//! [`Runloop`], never inline with the call that armed them, and every
//! operation returns a [`Cancelable`] that suppresses its delivery
//! without aborting the underlying I/O.
//!
//! The shipped engine backend is built on `rustls`; see
//! [`RustlsConnector`] for the usual entry point. Any other engine can
//! be plugged in by implementing [`Tunnel`].

#![deny(missing_docs)]

pub mod cancelable;
pub mod endpoint;
pub mod error;
pub mod flow;
pub mod pipe;
pub mod resolver;
pub mod runloop;
pub mod rustls;
pub mod session;
pub mod state;
pub mod tls;
pub mod tunnel;

pub use crate::cancelable::Cancelable;
pub use crate::endpoint::Endpoint;
pub use crate::error::FlowError;
pub use crate::flow::{ConnectHandler, DataFlow, FlowDataType, ReadHandler, WriteHandler};
pub use crate::pipe::PipeFlow;
pub use crate::resolver::{AddressPreference, Resolver, SystemResolver};
pub use crate::runloop::Runloop;
pub use crate::rustls::{RustlsConnector, RustlsTunnel};
pub use crate::session::Session;
pub use crate::state::{FlowState, FlowStateMachine};
pub use crate::tls::TlsFlow;
pub use crate::tunnel::{HandshakeStatus, Tunnel};
