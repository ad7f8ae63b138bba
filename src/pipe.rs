//! In-memory loopback transport.
//!
//! A [`PipeFlow`] pair is two cross-connected flows on one runloop:
//! bytes written to one end are read from the other. The pair honours
//! the full [`DataFlow`] contract, including posted delivery and
//! end-of-stream on peer drop, which makes it the transport of choice
//! for exercising adapter stages without a network.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::{Rc, Weak};

use log::debug;

use crate::cancelable::Cancelable;
use crate::endpoint::Endpoint;
use crate::error::FlowError;
use crate::flow::{ConnectHandler, DataFlow, ReadHandler, WriteHandler};
use crate::runloop::Runloop;
use crate::session::Session;
use crate::state::{FlowState, FlowStateMachine};

/// One end of an in-memory flow pair.
pub struct PipeFlow {
    end: Rc<RefCell<PipeEnd>>,
}

struct PipeEnd {
    runloop: Rc<Runloop>,
    session: Rc<Session>,
    state: FlowStateMachine,
    connecting_to: Option<Endpoint>,
    peer: Weak<RefCell<PipeEnd>>,
    inbox: VecDeque<u8>,
    parked_read: Option<(usize, ReadHandler, Cancelable)>,
    peer_closed: bool,
    write_closed: bool,
    connect_cancelable: Cancelable,
    read_cancelable: Cancelable,
    write_cancelable: Cancelable,
}

fn closed_by_peer() -> FlowError {
    FlowError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed by peer",
    ))
}

impl PipeEnd {
    fn new(runloop: Rc<Runloop>, session: Rc<Session>) -> PipeEnd {
        PipeEnd {
            runloop,
            session,
            state: FlowStateMachine::new(),
            connecting_to: None,
            peer: Weak::new(),
            inbox: VecDeque::new(),
            parked_read: None,
            peer_closed: false,
            write_closed: false,
            connect_cancelable: Cancelable::new(),
            read_cancelable: Cancelable::new(),
            write_cancelable: Cancelable::new(),
        }
    }

    /// Satisfies a parked read if data or an end-of-stream is available.
    fn wake_parked(&mut self) {
        if self.inbox.is_empty() && !self.peer_closed {
            return;
        }
        if let Some((hint, handler, token)) = self.parked_read.take() {
            self.state.read_end();
            if self.inbox.is_empty() {
                self.runloop.post(move || {
                    if !token.canceled() {
                        handler(Err(closed_by_peer()));
                    }
                });
            } else {
                let n = hint.max(1).min(self.inbox.len());
                let data: Vec<u8> = self.inbox.drain(..n).collect();
                self.runloop.post(move || {
                    if !token.canceled() {
                        handler(Ok(data));
                    }
                });
            }
        }
    }
}

impl PipeFlow {
    /// Two cross-connected ends sharing one runloop and session.
    pub fn pair(runloop: &Rc<Runloop>, session: &Rc<Session>) -> (PipeFlow, PipeFlow) {
        let a = Rc::new(RefCell::new(PipeEnd::new(runloop.clone(), session.clone())));
        let b = Rc::new(RefCell::new(PipeEnd::new(runloop.clone(), session.clone())));
        a.borrow_mut().peer = Rc::downgrade(&b);
        b.borrow_mut().peer = Rc::downgrade(&a);
        (PipeFlow { end: a }, PipeFlow { end: b })
    }
}

impl DataFlow for PipeFlow {
    fn connect(&mut self, endpoint: Endpoint, handler: ConnectHandler) -> Cancelable {
        let mut e = self.end.borrow_mut();
        debug_assert!(
            matches!(e.state.state(), FlowState::Init),
            "flow already connected"
        );
        if !matches!(e.state.state(), FlowState::Init) {
            return Cancelable::already_canceled();
        }
        debug!("pipe connect to {}", endpoint);
        e.state.connect_begin();
        e.connecting_to = Some(endpoint);
        e.connect_cancelable = Cancelable::new();
        let token = e.connect_cancelable.clone();
        let guard = token.clone();
        let weak = Rc::downgrade(&self.end);
        e.runloop.post(move || {
            if guard.canceled() {
                return;
            }
            if let Some(end) = weak.upgrade() {
                end.borrow_mut().state.connected();
            }
            handler(Ok(()));
        });
        token
    }

    fn read(&mut self, hint: usize, handler: ReadHandler) -> Cancelable {
        let mut e = self.end.borrow_mut();
        debug_assert!(e.parked_read.is_none(), "a read is already outstanding");
        if e.parked_read.is_some() {
            return Cancelable::already_canceled();
        }
        e.state.read_begin();
        e.read_cancelable = Cancelable::new();
        let token = e.read_cancelable.clone();
        if !e.inbox.is_empty() {
            let n = hint.max(1).min(e.inbox.len());
            let data: Vec<u8> = e.inbox.drain(..n).collect();
            e.state.read_end();
            let guard = token.clone();
            e.runloop.post(move || {
                if !guard.canceled() {
                    handler(Ok(data));
                }
            });
        } else if e.peer_closed {
            e.state.read_end();
            let guard = token.clone();
            e.runloop.post(move || {
                if !guard.canceled() {
                    handler(Err(closed_by_peer()));
                }
            });
        } else {
            e.parked_read = Some((hint, handler, token.clone()));
        }
        token
    }

    fn write(&mut self, data: Vec<u8>, handler: WriteHandler) -> Cancelable {
        let mut e = self.end.borrow_mut();
        debug_assert!(!e.write_closed, "write after close_write");
        if e.write_closed {
            return Cancelable::already_canceled();
        }
        e.state.write_begin();
        e.write_cancelable = Cancelable::new();
        let token = e.write_cancelable.clone();
        let guard = token.clone();
        let result = match e.peer.upgrade() {
            Some(peer) => {
                let mut p = peer.borrow_mut();
                p.inbox.extend(data);
                p.wake_parked();
                Ok(())
            }
            None => Err(FlowError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer end dropped",
            ))),
        };
        e.state.write_end();
        e.runloop.post(move || {
            if !guard.canceled() {
                handler(result);
            }
        });
        token
    }

    fn close_write(&mut self, handler: WriteHandler) -> Cancelable {
        let mut e = self.end.borrow_mut();
        debug_assert!(!e.write_closed, "write side already closed");
        if e.write_closed {
            return Cancelable::already_canceled();
        }
        debug!("pipe write side closing");
        e.write_closed = true;
        if matches!(e.state.state(), FlowState::Established) {
            e.state.write_close();
        }
        if let Some(peer) = e.peer.upgrade() {
            let mut p = peer.borrow_mut();
            p.peer_closed = true;
            p.wake_parked();
        }
        e.write_cancelable = Cancelable::new();
        let token = e.write_cancelable.clone();
        let guard = token.clone();
        e.runloop.post(move || {
            if !guard.canceled() {
                handler(Ok(()));
            }
        });
        token
    }

    fn state(&self) -> FlowState {
        self.end.borrow().state.state()
    }

    fn connecting_to(&self) -> Option<Endpoint> {
        self.end.borrow().connecting_to.clone()
    }

    fn session(&self) -> Rc<Session> {
        self.end.borrow().session.clone()
    }

    fn runloop(&self) -> Rc<Runloop> {
        self.end.borrow().runloop.clone()
    }
}

impl Drop for PipeFlow {
    fn drop(&mut self) {
        let mut e = self.end.borrow_mut();
        e.connect_cancelable.cancel();
        e.read_cancelable.cancel();
        e.write_cancelable.cancel();
        if let Some(peer) = e.peer.upgrade() {
            let mut p = peer.borrow_mut();
            p.peer_closed = true;
            p.wake_parked();
        }
    }
}
