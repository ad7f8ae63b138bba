//! The TLS client flow.
//!
//! [`TlsFlow`] sits between an upstream consumer and a lower transport
//! flow. It owns an opaque [`Tunnel`] and the inner flow, drives the
//! handshake to completion across however many inner reads and writes it
//! takes, and thereafter pumps plaintext and ciphertext between the two
//! sides. Upward it exposes the same [`DataFlow`] contract it consumes
//! downward, so TLS stages stack over any transport.
//!
//! All progress happens in a reactor step: every user call and every
//! inner completion funnels into one pump that inspects the tunnel and
//! the inner flow's state machine and issues at most one pending inner
//! read and one pending inner write. Every continuation carries a
//! cancellation token and a weak handle, so completions arriving after
//! cancellation or destruction are absorbed without touching freed
//! state.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use log::debug;

use crate::cancelable::Cancelable;
use crate::endpoint::Endpoint;
use crate::error::FlowError;
use crate::flow::{ConnectHandler, DataFlow, ReadHandler, WriteHandler};
use crate::runloop::Runloop;
use crate::session::Session;
use crate::state::{FlowState, FlowStateMachine};
use crate::tunnel::{HandshakeStatus, Tunnel};

/// Size hint for ciphertext reads from the inner flow.
const CIPHER_READ_HINT: usize = 8192;

/// A TLS client stage over a lower transport flow.
///
/// Reads deliver decrypted plaintext in peer order; writes complete once
/// all supplied plaintext has been encrypted and handed to the inner
/// flow. The first error, whether from the engine or the transport, is
/// delivered to exactly one user handler; afterwards the flow is dead
/// and further operations are caller errors.
///
/// Dropping the flow cancels every outstanding operation: handlers
/// armed at that point are never invoked, and completions still in
/// flight from the inner flow are absorbed.
pub struct TlsFlow {
    shared: Rc<RefCell<Shared>>,
}

struct Shared {
    session: Rc<Session>,
    tunnel: Box<dyn Tunnel>,
    next_hop: Box<dyn DataFlow>,
    state: FlowStateMachine,
    connecting_to: Option<Endpoint>,
    connect_handler: Option<ConnectHandler>,
    read_handler: Option<ReadHandler>,
    write_handler: Option<WriteHandler>,
    connect_cancelable: Cancelable,
    read_cancelable: Cancelable,
    write_cancelable: Cancelable,
    hop_read_cancelable: Cancelable,
    hop_write_cancelable: Cancelable,
    pending_error: Option<FlowError>,
    error_reported: bool,
    write_closing: bool,
    write_closed: bool,
}

impl TlsFlow {
    /// Creates a TLS stage owning `tunnel` and `next_hop`. Nothing
    /// happens until [`connect`](DataFlow::connect).
    pub fn new(
        session: Rc<Session>,
        tunnel: Box<dyn Tunnel>,
        next_hop: Box<dyn DataFlow>,
    ) -> TlsFlow {
        TlsFlow {
            shared: Rc::new(RefCell::new(Shared {
                session,
                tunnel,
                next_hop,
                state: FlowStateMachine::new(),
                connecting_to: None,
                connect_handler: None,
                read_handler: None,
                write_handler: None,
                connect_cancelable: Cancelable::new(),
                read_cancelable: Cancelable::new(),
                write_cancelable: Cancelable::new(),
                hop_read_cancelable: Cancelable::new(),
                hop_write_cancelable: Cancelable::new(),
                pending_error: None,
                error_reported: false,
                write_closing: false,
                write_closed: false,
            })),
        }
    }

    /// The transport flow below this stage.
    pub fn next_hop(&self) -> Ref<'_, dyn DataFlow> {
        Ref::map(self.shared.borrow(), |s| &*s.next_hop)
    }
}

impl DataFlow for TlsFlow {
    fn connect(&mut self, endpoint: Endpoint, handler: ConnectHandler) -> Cancelable {
        let mut s = self.shared.borrow_mut();
        debug_assert!(
            matches!(s.state.state(), FlowState::Init),
            "flow already connected"
        );
        if !matches!(s.state.state(), FlowState::Init) {
            return Cancelable::already_canceled();
        }
        s.state.connect_begin();
        if let Err(err) = s.tunnel.set_domain(endpoint.host()) {
            debug!("engine refused domain {}: {}", endpoint.host(), err);
            s.state.errored();
            s.error_reported = true;
            s.connect_cancelable = Cancelable::new();
            let token = s.connect_cancelable.clone();
            let guard = token.clone();
            s.runloop().post(move || {
                if !guard.canceled() {
                    handler(Err(err));
                }
            });
            return token;
        }
        debug!("connecting to {}", endpoint);
        s.connecting_to = Some(endpoint.clone());
        s.connect_handler = Some(handler);
        s.connect_cancelable = Cancelable::new();
        let token = s.connect_cancelable.clone();
        let guard = token.clone();
        let weak = Rc::downgrade(&self.shared);
        s.next_hop.connect(
            endpoint,
            Box::new(move |result| {
                if guard.canceled() {
                    return;
                }
                let me = match weak.upgrade() {
                    Some(me) => me,
                    None => return,
                };
                match result {
                    Ok(()) => drive_handshake(&me),
                    Err(err) => fail_connect(&me, err),
                }
            }),
        );
        token
    }

    fn read(&mut self, hint: usize, handler: ReadHandler) -> Cancelable {
        // The hint is advisory only; plaintext buffers are produced and
        // owned by the tunnel.
        let _ = hint;
        let mut s = self.shared.borrow_mut();
        debug_assert!(s.read_handler.is_none(), "a read is already outstanding");
        debug_assert!(!s.error_reported, "read after the flow reported an error");
        if s.read_handler.is_some() || s.error_reported {
            return Cancelable::already_canceled();
        }
        if s.pending_error.is_none() {
            s.state.read_begin();
        }
        s.read_cancelable = Cancelable::new();
        s.read_handler = Some(handler);
        let token = s.read_cancelable.clone();
        drop(s);
        process(&self.shared);
        token
    }

    fn write(&mut self, data: Vec<u8>, handler: WriteHandler) -> Cancelable {
        let mut s = self.shared.borrow_mut();
        debug_assert!(s.write_handler.is_none(), "a write is already outstanding");
        debug_assert!(!s.write_closed, "write after close_write");
        debug_assert!(!s.error_reported, "write after the flow reported an error");
        if s.write_handler.is_some() || s.write_closed || s.error_reported {
            return Cancelable::already_canceled();
        }
        if s.pending_error.is_none() {
            s.state.write_begin();
            s.tunnel.write_plaintext(&data);
        }
        s.write_cancelable = Cancelable::new();
        s.write_handler = Some(handler);
        let token = s.write_cancelable.clone();
        drop(s);
        process(&self.shared);
        token
    }

    fn close_write(&mut self, handler: WriteHandler) -> Cancelable {
        let mut s = self.shared.borrow_mut();
        debug_assert!(s.write_handler.is_none(), "a write is already outstanding");
        debug_assert!(!s.write_closed, "write side already closed");
        debug_assert!(
            !s.error_reported,
            "close_write after the flow reported an error"
        );
        if s.write_handler.is_some() || s.write_closed || s.error_reported {
            return Cancelable::already_canceled();
        }
        if s.pending_error.is_none() {
            debug!("closing write side");
            s.state.write_begin();
            s.write_closing = true;
            s.tunnel.close();
        }
        s.write_cancelable = Cancelable::new();
        s.write_handler = Some(handler);
        let token = s.write_cancelable.clone();
        drop(s);
        process(&self.shared);
        token
    }

    fn state(&self) -> FlowState {
        self.shared.borrow().state.state()
    }

    fn connecting_to(&self) -> Option<Endpoint> {
        self.shared.borrow().connecting_to.clone()
    }

    fn session(&self) -> Rc<Session> {
        self.shared.borrow().session.clone()
    }

    fn runloop(&self) -> Rc<Runloop> {
        self.shared.borrow().runloop()
    }
}

impl Drop for TlsFlow {
    fn drop(&mut self) {
        let s = self.shared.borrow();
        s.connect_cancelable.cancel();
        s.read_cancelable.cancel();
        s.write_cancelable.cancel();
        s.hop_read_cancelable.cancel();
        s.hop_write_cancelable.cancel();
    }
}

impl Shared {
    fn runloop(&self) -> Rc<Runloop> {
        self.next_hop.runloop()
    }

    /// Moves plaintext upward: delivers to an armed user read, then
    /// keeps the engine fed with ciphertext from below.
    fn try_read(&mut self, me: &Rc<RefCell<Shared>>) {
        if self.tunnel.has_plaintext() {
            if let Some(handler) = self.read_handler.take() {
                let data = self.tunnel.read_plaintext();
                debug!("delivering {} plaintext bytes", data.len());
                self.state.read_end();
                let guard = self.read_cancelable.clone();
                self.runloop().post(move || {
                    if !guard.canceled() {
                        handler(Ok(data));
                    }
                });
            }
        }
        // Even with no user read armed, keep draining an in-progress
        // record so the engine can make progress.
        if self.tunnel.need_cipher_input() {
            self.issue_hop_read(me);
        }
    }

    /// Moves ciphertext downward: flushes pending engine output, and
    /// completes the user write once everything it queued is through.
    fn try_write(&mut self, me: &Rc<RefCell<Shared>>) {
        if self.tunnel.finished_writing_cipher() {
            if let Some(handler) = self.write_handler.take() {
                debug!("write flushed through");
                self.state.write_end();
                if self.write_closing {
                    self.write_closing = false;
                    self.write_closed = true;
                    self.state.write_close();
                }
                let guard = self.write_cancelable.clone();
                self.runloop().post(move || {
                    if !guard.canceled() {
                        handler(Ok(()));
                    }
                });
            }
        } else {
            self.issue_hop_write(me);
        }
    }

    fn issue_hop_read(&mut self, me: &Rc<RefCell<Shared>>) {
        if self.next_hop.state().is_reading() {
            // The in-flight read reconverges into process() when it
            // completes.
            return;
        }
        let weak = Rc::downgrade(me);
        self.hop_read_cancelable = self.next_hop.read(
            CIPHER_READ_HINT,
            Box::new(move |result| {
                let me = match weak.upgrade() {
                    Some(me) => me,
                    None => return,
                };
                on_hop_read(&me, result);
            }),
        );
    }

    fn issue_hop_write(&mut self, me: &Rc<RefCell<Shared>>) {
        if self.next_hop.state().is_writing() {
            return;
        }
        let chunk = self.tunnel.read_ciphertext();
        if chunk.is_empty() {
            return;
        }
        debug!("writing {} ciphertext bytes", chunk.len());
        let weak = Rc::downgrade(me);
        self.hop_write_cancelable = self.next_hop.write(
            chunk,
            Box::new(move |result| {
                let me = match weak.upgrade() {
                    Some(me) => me,
                    None => return,
                };
                on_hop_write(&me, result);
            }),
        );
    }

    /// Posts `err` to the preferred handler if one is armed, clearing
    /// the slot first; tries the other side next. Gives the error back
    /// if neither side has a handler.
    fn deliver_error(&mut self, err: FlowError, try_read_first: bool) -> Result<(), FlowError> {
        if try_read_first {
            self.error_to_read(err).or_else(|err| self.error_to_write(err))
        } else {
            self.error_to_write(err).or_else(|err| self.error_to_read(err))
        }
    }

    fn error_to_read(&mut self, err: FlowError) -> Result<(), FlowError> {
        match self.read_handler.take() {
            Some(handler) => {
                let guard = self.read_cancelable.clone();
                self.runloop().post(move || {
                    if !guard.canceled() {
                        handler(Err(err));
                    }
                });
                Ok(())
            }
            None => Err(err),
        }
    }

    fn error_to_write(&mut self, err: FlowError) -> Result<(), FlowError> {
        match self.write_handler.take() {
            Some(handler) => {
                let guard = self.write_cancelable.clone();
                self.runloop().post(move || {
                    if !guard.canceled() {
                        handler(Err(err));
                    }
                });
                Ok(())
            }
            None => Err(err),
        }
    }
}

/// One cycle of the handshake driver. Re-entered after every inner
/// completion until the engine reports completion or fails.
fn drive_handshake(me: &Rc<RefCell<Shared>>) {
    let mut s = me.borrow_mut();
    if s.connect_cancelable.canceled() {
        return;
    }
    match s.tunnel.handshake() {
        Ok(HandshakeStatus::Complete) => {
            let out = s.tunnel.read_ciphertext();
            if !out.is_empty() {
                debug!("handshake complete, flushing {} bytes", out.len());
                handshake_write(&mut s, me, out);
            } else {
                debug!("handshake complete");
                s.state.connected();
                if let Some(handler) = s.connect_handler.take() {
                    let guard = s.connect_cancelable.clone();
                    s.runloop().post(move || {
                        if !guard.canceled() {
                            handler(Ok(()));
                        }
                    });
                }
                drop(s);
                // Plaintext can ride in with the final flight; give the
                // pump a chance to move it.
                process(me);
            }
        }
        Ok(HandshakeStatus::WantIo) => {
            let out = s.tunnel.read_ciphertext();
            if !out.is_empty() {
                debug!("still handshaking, {} bytes to write", out.len());
                handshake_write(&mut s, me, out);
            } else {
                debug!("still handshaking, waiting for ciphertext");
                handshake_read(&mut s, me);
            }
        }
        Err(err) => {
            debug!("handshake failed: {}", err);
            drop(s);
            fail_connect(me, err);
        }
    }
}

fn handshake_write(s: &mut Shared, me: &Rc<RefCell<Shared>>, data: Vec<u8>) {
    let guard = s.connect_cancelable.clone();
    let weak = Rc::downgrade(me);
    s.hop_write_cancelable = s.next_hop.write(
        data,
        Box::new(move |result| {
            if guard.canceled() {
                return;
            }
            let me = match weak.upgrade() {
                Some(me) => me,
                None => return,
            };
            match result {
                Ok(()) => drive_handshake(&me),
                Err(err) => fail_connect(&me, err),
            }
        }),
    );
}

fn handshake_read(s: &mut Shared, me: &Rc<RefCell<Shared>>) {
    let guard = s.connect_cancelable.clone();
    let weak = Rc::downgrade(me);
    s.hop_read_cancelable = s.next_hop.read(
        CIPHER_READ_HINT,
        Box::new(move |result| {
            if guard.canceled() {
                return;
            }
            let me = match weak.upgrade() {
                Some(me) => me,
                None => return,
            };
            match result {
                Ok(data) => {
                    let fed = me.borrow_mut().tunnel.write_ciphertext(&data);
                    match fed {
                        Ok(()) => drive_handshake(&me),
                        Err(err) => fail_connect(&me, err),
                    }
                }
                Err(err) => fail_connect(&me, err),
            }
        }),
    );
}

/// Fails the connect: marks the flow errored and posts the error to the
/// connect handler. No partial success is ever exposed.
fn fail_connect(me: &Rc<RefCell<Shared>>, err: FlowError) {
    let mut s = me.borrow_mut();
    if s.error_reported {
        return;
    }
    debug!("connect failed: {}", err);
    s.state.errored();
    if let Some(handler) = s.connect_handler.take() {
        s.error_reported = true;
        let guard = s.connect_cancelable.clone();
        s.runloop().post(move || {
            if !guard.canceled() {
                handler(Err(err));
            }
        });
    }
}

/// The steady-state pump. Invoked after every state change: user call,
/// inner read completion, inner write completion.
fn process(me: &Rc<RefCell<Shared>>) {
    let mut s = me.borrow_mut();
    if s.error_reported {
        return;
    }
    if let Some(err) = s.pending_error.take() {
        match s.deliver_error(err, true) {
            Ok(()) => s.error_reported = true,
            Err(err) => s.pending_error = Some(err),
        }
        return;
    }
    s.try_read(me);
    s.try_write(me);
}

fn on_hop_read(me: &Rc<RefCell<Shared>>, result: Result<Vec<u8>, FlowError>) {
    match result {
        Ok(data) => {
            let fed = me.borrow_mut().tunnel.write_ciphertext(&data);
            match fed {
                Ok(()) => process(me),
                Err(err) => report_error(me, err, true),
            }
        }
        // An inner read error usually means the peer half-closed or
        // dropped; the user's read is the natural surface for it.
        Err(err) => report_error(me, err, true),
    }
}

fn on_hop_write(me: &Rc<RefCell<Shared>>, result: Result<(), FlowError>) {
    match result {
        Ok(()) => process(me),
        Err(err) => report_error(me, err, false),
    }
}

/// Records the first error. Delivered immediately on the preferred side
/// if a handler is armed there (or on the other side otherwise); parked
/// in `pending_error` until the next user operation if neither is.
fn report_error(me: &Rc<RefCell<Shared>>, err: FlowError, try_read_first: bool) {
    let mut s = me.borrow_mut();
    if s.error_reported || s.pending_error.is_some() {
        // Only the first error is ever surfaced.
        return;
    }
    debug!("flow error: {}", err);
    s.state.errored();
    match s.deliver_error(err, try_read_first) {
        Ok(()) => s.error_reported = true,
        Err(err) => s.pending_error = Some(err),
    }
}
