//! Test doubles: a scripted TLS engine and a scripted inner flow.
//!
//! The scripted tunnel walks a programmed handshake and thereafter maps
//! plaintext to ciphertext by adding one to every byte, so tests can
//! assert on exact wire bytes. The scripted flow records every inner
//! operation, lets tests feed or fail completions, and asserts the
//! one-outstanding-operation invariant the real contract demands.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::mem;
use std::rc::Rc;

use tls_flow::{
    Cancelable, ConnectHandler, DataFlow, Endpoint, FlowError, FlowState, FlowStateMachine,
    HandshakeStatus, ReadHandler, Runloop, Session, TlsFlow, Tunnel, WriteHandler,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One step of a scripted handshake, consumed per `handshake()` call.
pub enum Step {
    /// Queue this ciphertext and report `WantIo`.
    WantIo(&'static [u8]),
    /// Queue this ciphertext and report `Complete`.
    Complete(&'static [u8]),
    /// Fail the handshake.
    Fail,
}

struct TunnelState {
    steps: VecDeque<Step>,
    cipher_out: Vec<u8>,
    plain_in: Vec<u8>,
    fed: Vec<u8>,
    done: bool,
    need_cipher: bool,
    poison_cipher: bool,
    errored: bool,
    domain: Option<String>,
    closed: bool,
    close_bytes: Vec<u8>,
}

pub struct ScriptedTunnel {
    state: Rc<RefCell<TunnelState>>,
}

/// Test-side control over a [`ScriptedTunnel`] that has been moved into
/// a flow.
#[derive(Clone)]
pub struct TunnelHandle {
    state: Rc<RefCell<TunnelState>>,
}

pub fn scripted_tunnel(steps: Vec<Step>) -> (Box<dyn Tunnel>, TunnelHandle) {
    let state = Rc::new(RefCell::new(TunnelState {
        steps: steps.into(),
        cipher_out: Vec::new(),
        plain_in: Vec::new(),
        fed: Vec::new(),
        done: false,
        need_cipher: false,
        poison_cipher: false,
        errored: false,
        domain: None,
        closed: false,
        close_bytes: Vec::new(),
    }));
    (
        Box::new(ScriptedTunnel {
            state: state.clone(),
        }),
        TunnelHandle { state },
    )
}

fn rot1_encrypt(data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    data.iter().map(|b| b.wrapping_add(1))
}

fn rot1_decrypt(data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    data.iter().map(|b| b.wrapping_sub(1))
}

impl Tunnel for ScriptedTunnel {
    fn set_domain(&mut self, host: &str) -> Result<(), FlowError> {
        self.state.borrow_mut().domain = Some(host.to_string());
        Ok(())
    }

    fn handshake(&mut self) -> Result<HandshakeStatus, FlowError> {
        let mut s = self.state.borrow_mut();
        if s.errored {
            return Err(FlowError::tls("scripted engine failure"));
        }
        match s.steps.pop_front() {
            Some(Step::WantIo(cipher)) => {
                s.cipher_out.extend_from_slice(cipher);
                Ok(HandshakeStatus::WantIo)
            }
            Some(Step::Complete(cipher)) => {
                s.done = true;
                s.cipher_out.extend_from_slice(cipher);
                Ok(HandshakeStatus::Complete)
            }
            Some(Step::Fail) => {
                s.errored = true;
                Err(FlowError::tls("scripted engine failure"))
            }
            None => {
                s.done = true;
                Ok(HandshakeStatus::Complete)
            }
        }
    }

    fn read_ciphertext(&mut self) -> Vec<u8> {
        mem::take(&mut self.state.borrow_mut().cipher_out)
    }

    fn write_ciphertext(&mut self, data: &[u8]) -> Result<(), FlowError> {
        let mut s = self.state.borrow_mut();
        if s.poison_cipher {
            s.errored = true;
            return Err(FlowError::tls("scripted record failure"));
        }
        if s.done {
            let plain: Vec<u8> = rot1_decrypt(data).collect();
            s.plain_in.extend(plain);
        } else {
            s.fed.extend_from_slice(data);
        }
        Ok(())
    }

    fn has_plaintext(&self) -> bool {
        !self.state.borrow().plain_in.is_empty()
    }

    fn read_plaintext(&mut self) -> Vec<u8> {
        mem::take(&mut self.state.borrow_mut().plain_in)
    }

    fn write_plaintext(&mut self, data: &[u8]) {
        let mut s = self.state.borrow_mut();
        let cipher: Vec<u8> = rot1_encrypt(data).collect();
        s.cipher_out.extend(cipher);
    }

    fn need_cipher_input(&self) -> bool {
        self.state.borrow().need_cipher
    }

    fn finished_writing_cipher(&self) -> bool {
        self.state.borrow().cipher_out.is_empty()
    }

    fn errored(&self) -> bool {
        self.state.borrow().errored
    }

    fn close(&mut self) {
        let mut s = self.state.borrow_mut();
        s.closed = true;
        let alert = s.close_bytes.clone();
        s.cipher_out.extend(alert);
    }
}

impl TunnelHandle {
    pub fn set_need_cipher(&self, yes: bool) {
        self.state.borrow_mut().need_cipher = yes;
    }

    pub fn poison_cipher_input(&self) {
        self.state.borrow_mut().poison_cipher = true;
    }

    pub fn set_close_bytes(&self, bytes: &[u8]) {
        self.state.borrow_mut().close_bytes = bytes.to_vec();
    }

    pub fn fed(&self) -> Vec<u8> {
        self.state.borrow().fed.clone()
    }

    pub fn closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn domain(&self) -> Option<String> {
        self.state.borrow().domain.clone()
    }
}

struct HopState {
    runloop: Rc<Runloop>,
    session: Rc<Session>,
    state: FlowStateMachine,
    connecting_to: Option<Endpoint>,
    fail_connect: Option<io::ErrorKind>,
    parked_read: Option<(ReadHandler, Cancelable)>,
    queued_reads: VecDeque<Result<Vec<u8>, io::ErrorKind>>,
    writes: Vec<Vec<u8>>,
    write_in_flight: bool,
    hold_writes: bool,
    held_writes: Vec<(Result<(), io::ErrorKind>, WriteHandler, Cancelable)>,
    fail_writes: VecDeque<io::ErrorKind>,
    write_closed: bool,
    reads_issued: usize,
    writes_issued: usize,
    deliver_canceled: bool,
}

/// An inner flow whose completions are fed by the test.
pub struct ScriptedFlow {
    state: Rc<RefCell<HopState>>,
}

/// Test-side control over a [`ScriptedFlow`] that has been moved into a
/// flow.
#[derive(Clone)]
pub struct HopHandle {
    state: Rc<RefCell<HopState>>,
}

pub fn scripted_flow(runloop: &Rc<Runloop>, session: &Rc<Session>) -> (ScriptedFlow, HopHandle) {
    let state = Rc::new(RefCell::new(HopState {
        runloop: runloop.clone(),
        session: session.clone(),
        state: FlowStateMachine::new(),
        connecting_to: None,
        fail_connect: None,
        parked_read: None,
        queued_reads: VecDeque::new(),
        writes: Vec::new(),
        write_in_flight: false,
        hold_writes: false,
        held_writes: Vec::new(),
        fail_writes: VecDeque::new(),
        write_closed: false,
        reads_issued: 0,
        writes_issued: 0,
        deliver_canceled: false,
    }));
    (
        ScriptedFlow {
            state: state.clone(),
        },
        HopHandle { state },
    )
}

fn deliver_read(
    state: &Rc<RefCell<HopState>>,
    result: Result<Vec<u8>, io::ErrorKind>,
    handler: ReadHandler,
    token: Cancelable,
) {
    let shared = state.clone();
    let runloop = state.borrow().runloop.clone();
    runloop.post(move || {
        let deliver_canceled = {
            let mut s = shared.borrow_mut();
            s.state.read_end();
            s.deliver_canceled
        };
        if token.canceled() && !deliver_canceled {
            return;
        }
        handler(result.map_err(|kind| FlowError::Io(io::Error::from(kind))));
    });
}

fn deliver_write(
    state: &Rc<RefCell<HopState>>,
    result: Result<(), io::ErrorKind>,
    handler: WriteHandler,
    token: Cancelable,
) {
    let shared = state.clone();
    let runloop = state.borrow().runloop.clone();
    runloop.post(move || {
        let deliver_canceled = {
            let mut s = shared.borrow_mut();
            s.write_in_flight = false;
            s.state.write_end();
            s.deliver_canceled
        };
        if token.canceled() && !deliver_canceled {
            return;
        }
        handler(result.map_err(|kind| FlowError::Io(io::Error::from(kind))));
    });
}

impl DataFlow for ScriptedFlow {
    fn connect(&mut self, endpoint: Endpoint, handler: ConnectHandler) -> Cancelable {
        let mut s = self.state.borrow_mut();
        s.state.connect_begin();
        s.connecting_to = Some(endpoint);
        let fail = s.fail_connect.take();
        let token = Cancelable::new();
        let guard = token.clone();
        let shared = self.state.clone();
        s.runloop.post(move || {
            let deliver_canceled = {
                let mut s = shared.borrow_mut();
                match fail {
                    Some(_) => s.state.errored(),
                    None => s.state.connected(),
                }
                s.deliver_canceled
            };
            if guard.canceled() && !deliver_canceled {
                return;
            }
            match fail {
                Some(kind) => handler(Err(FlowError::Io(io::Error::from(kind)))),
                None => handler(Ok(())),
            }
        });
        token
    }

    fn read(&mut self, _hint: usize, handler: ReadHandler) -> Cancelable {
        let mut s = self.state.borrow_mut();
        assert!(
            s.parked_read.is_none(),
            "inner flow saw a second concurrent read"
        );
        s.reads_issued += 1;
        s.state.read_begin();
        let token = Cancelable::new();
        match s.queued_reads.pop_front() {
            Some(result) => {
                drop(s);
                deliver_read(&self.state, result, handler, token.clone());
            }
            None => {
                s.parked_read = Some((handler, token.clone()));
            }
        }
        token
    }

    fn write(&mut self, data: Vec<u8>, handler: WriteHandler) -> Cancelable {
        let mut s = self.state.borrow_mut();
        assert!(
            !s.write_in_flight,
            "inner flow saw a second concurrent write"
        );
        s.writes_issued += 1;
        s.write_in_flight = true;
        s.state.write_begin();
        s.writes.push(data);
        let result = match s.fail_writes.pop_front() {
            Some(kind) => Err(kind),
            None => Ok(()),
        };
        let token = Cancelable::new();
        if s.hold_writes {
            s.held_writes.push((result, handler, token.clone()));
        } else {
            drop(s);
            deliver_write(&self.state, result, handler, token.clone());
        }
        token
    }

    fn close_write(&mut self, handler: WriteHandler) -> Cancelable {
        let mut s = self.state.borrow_mut();
        s.write_closed = true;
        let token = Cancelable::new();
        let guard = token.clone();
        s.runloop.post(move || {
            if !guard.canceled() {
                handler(Ok(()));
            }
        });
        token
    }

    fn state(&self) -> FlowState {
        self.state.borrow().state.state()
    }

    fn connecting_to(&self) -> Option<Endpoint> {
        self.state.borrow().connecting_to.clone()
    }

    fn session(&self) -> Rc<Session> {
        self.state.borrow().session.clone()
    }

    fn runloop(&self) -> Rc<Runloop> {
        self.state.borrow().runloop.clone()
    }
}

impl HopHandle {
    /// Completes the parked inner read with data, or queues it for the
    /// next read.
    pub fn feed_read(&self, data: &[u8]) {
        let mut s = self.state.borrow_mut();
        match s.parked_read.take() {
            Some((handler, token)) => {
                drop(s);
                deliver_read(&self.state, Ok(data.to_vec()), handler, token);
            }
            None => {
                s.queued_reads.push_back(Ok(data.to_vec()));
            }
        }
    }

    /// Fails the parked inner read, or queues the failure for the next
    /// read.
    pub fn fail_read(&self, kind: io::ErrorKind) {
        let mut s = self.state.borrow_mut();
        match s.parked_read.take() {
            Some((handler, token)) => {
                drop(s);
                deliver_read(&self.state, Err(kind), handler, token);
            }
            None => {
                s.queued_reads.push_back(Err(kind));
            }
        }
    }

    /// Makes the next inner write complete with the given error.
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().fail_writes.push_back(kind);
    }

    /// Makes the pending connect complete with the given error.
    pub fn fail_connect(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().fail_connect = Some(kind);
    }

    /// Holds inner write completions until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.state.borrow_mut().hold_writes = true;
    }

    /// Releases every held inner write completion.
    pub fn release_writes(&self) {
        let held = {
            let mut s = self.state.borrow_mut();
            s.hold_writes = false;
            mem::take(&mut s.held_writes)
        };
        for (result, handler, token) in held {
            deliver_write(&self.state, result, handler, token);
        }
    }

    /// Invoke completions even when their token was canceled, to model
    /// deliveries already in flight at cancellation time.
    pub fn deliver_even_if_canceled(&self) {
        self.state.borrow_mut().deliver_canceled = true;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.borrow().writes.clone()
    }

    pub fn reads_issued(&self) -> usize {
        self.state.borrow().reads_issued
    }

    pub fn writes_issued(&self) -> usize {
        self.state.borrow().writes_issued
    }

    pub fn has_parked_read(&self) -> bool {
        self.state.borrow().parked_read.is_some()
    }

    pub fn write_closed(&self) -> bool {
        self.state.borrow().write_closed
    }
}

/// A captured handler-result log; one entry per delivery.
pub type Captured<T> = Rc<RefCell<Vec<T>>>;

pub fn capture_connect() -> (Captured<Result<(), String>>, ConnectHandler) {
    let log: Captured<Result<(), String>> = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (
        log,
        Box::new(move |result| sink.borrow_mut().push(result.map_err(|e| e.to_string()))),
    )
}

pub fn capture_read() -> (Captured<Result<Vec<u8>, String>>, ReadHandler) {
    let log: Captured<Result<Vec<u8>, String>> = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (
        log,
        Box::new(move |result| sink.borrow_mut().push(result.map_err(|e| e.to_string()))),
    )
}

pub fn capture_write() -> (Captured<Result<(), String>>, WriteHandler) {
    let log: Captured<Result<(), String>> = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (
        log,
        Box::new(move |result| sink.borrow_mut().push(result.map_err(|e| e.to_string()))),
    )
}

/// A TLS flow over scripted collaborators, plus the controls for both.
pub struct Rig {
    pub runloop: Rc<Runloop>,
    pub flow: TlsFlow,
    pub hop: HopHandle,
    pub tunnel: TunnelHandle,
}

pub fn rig(steps: Vec<Step>) -> Rig {
    init_logging();
    let runloop = Runloop::new();
    let session = Rc::new(Session::new("upstream"));
    let (hop_flow, hop) = scripted_flow(&runloop, &session);
    let (tunnel_box, tunnel) = scripted_tunnel(steps);
    let flow = TlsFlow::new(session, tunnel_box, Box::new(hop_flow));
    Rig {
        runloop,
        flow,
        hop,
        tunnel,
    }
}

/// A rig whose flow has already completed a trivial handshake.
pub fn established_rig() -> Rig {
    let mut r = rig(vec![Step::Complete(b"")]);
    let (connected, handler) = capture_connect();
    r.flow.connect(Endpoint::new("example.com", 443), handler);
    r.runloop.run_until_idle();
    assert_eq!(connected.borrow().len(), 1);
    assert!(connected.borrow()[0].is_ok());
    assert_eq!(r.flow.state(), FlowState::Established);
    r
}
