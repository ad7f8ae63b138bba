//! The data-flow contract.
//!
//! A flow is one bidirectional byte-stream stage in a pipeline. Stages
//! compose by ownership: an adapter flow exclusively owns the flow below
//! it and exposes the same contract upward, so a TLS stage reads and
//! writes plaintext above while speaking ciphertext below.

use std::rc::Rc;

use crate::cancelable::Cancelable;
use crate::endpoint::Endpoint;
use crate::error::FlowError;
use crate::runloop::Runloop;
use crate::session::Session;
use crate::state::FlowState;

/// Completion handler for a connect.
pub type ConnectHandler = Box<dyn FnOnce(Result<(), FlowError>)>;

/// Completion handler for a read. Success carries at least one byte.
pub type ReadHandler = Box<dyn FnOnce(Result<Vec<u8>, FlowError>)>;

/// Completion handler for a write or a write-side close.
pub type WriteHandler = Box<dyn FnOnce(Result<(), FlowError>)>;

/// What kind of payload a flow carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowDataType {
    /// An ordered byte stream.
    Stream,
    /// Datagrams with preserved boundaries.
    Datagram,
}

/// A bidirectional byte-stream pipeline stage.
///
/// # Contract
///
/// - `connect` must be the first operation and completes exactly once.
/// - At most one read and one write may be outstanding at a time; a
///   second of either kind before the first completes is a caller bug
///   (asserted in debug builds, rejected with a canceled token in
///   release).
/// - Handlers are delivered through the flow's runloop and are never
///   invoked inline with the call that armed them, even when the result
///   is already available.
/// - Canceling the returned [`Cancelable`] prevents the handler from
///   being delivered; it does not abort I/O already in flight.
/// - After the first error has been delivered to some handler, no
///   further handler is ever invoked and all further operations are
///   caller errors.
pub trait DataFlow {
    /// Initiates the connection to `endpoint`. The handler fires once:
    /// with success when the stage (and every stage below it) is
    /// established, or with the first error.
    fn connect(&mut self, endpoint: Endpoint, handler: ConnectHandler) -> Cancelable;

    /// Requests the next chunk of data. `hint` is an advisory size; the
    /// delivered buffer may be shorter or longer, and is at least one
    /// byte on success.
    fn read(&mut self, hint: usize, handler: ReadHandler) -> Cancelable;

    /// Writes `data`. The handler fires when the stage has fully handed
    /// the bytes to the stage below it.
    fn write(&mut self, data: Vec<u8>, handler: WriteHandler) -> Cancelable;

    /// Closes the write side. The handler fires once the close has been
    /// handed downward; further writes are caller errors.
    fn close_write(&mut self, handler: WriteHandler) -> Cancelable;

    /// Snapshot of the flow's state machine, consulted by outer stages
    /// to coalesce pending I/O via [`FlowState::is_reading`] and
    /// [`FlowState::is_writing`].
    fn state(&self) -> FlowState;

    /// The endpoint a connect was issued for, if any.
    fn connecting_to(&self) -> Option<Endpoint>;

    /// The session this flow belongs to.
    fn session(&self) -> Rc<Session>;

    /// The payload kind of this flow.
    fn data_type(&self) -> FlowDataType {
        FlowDataType::Stream
    }

    /// The runloop completions are delivered on. Adapter stages delegate
    /// to the flow below them.
    fn runloop(&self) -> Rc<Runloop>;
}
