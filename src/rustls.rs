//! Tunnel backend backed by rustls.
//!
//! [`RustlsTunnel`] adapts a `rustls::ClientConnection` to the
//! [`Tunnel`] capability set: the engine's `write_tls`/`read_tls` sides
//! become the ciphertext queues and its `reader()`/`writer()` become the
//! plaintext queues. [`RustlsConnector`] carries the client
//! configuration and manufactures ready-to-connect [`TlsFlow`]s.

use std::convert::TryFrom;
use std::io::{Read, Write};
use std::iter::FromIterator;
use std::rc::Rc;
use std::sync::Arc;

use ::rustls::pki_types::ServerName;
use ::rustls::{ClientConfig, ClientConnection, RootCertStore};
use log::debug;

use crate::error::FlowError;
use crate::flow::DataFlow;
use crate::session::Session;
use crate::tls::TlsFlow;
use crate::tunnel::{HandshakeStatus, Tunnel};

/// A [`Tunnel`] over a `rustls::ClientConnection`.
///
/// The connection is created by [`set_domain`](Tunnel::set_domain),
/// which is also where SNI and the certificate-validation name are
/// fixed.
pub struct RustlsTunnel {
    config: Arc<ClientConfig>,
    conn: Option<ClientConnection>,
    plain_in: Vec<u8>,
    errored: bool,
}

impl RustlsTunnel {
    /// A tunnel that will handshake with the given client
    /// configuration.
    pub fn new(config: Arc<ClientConfig>) -> RustlsTunnel {
        RustlsTunnel {
            config,
            conn: None,
            plain_in: Vec::new(),
            errored: false,
        }
    }
}

impl Tunnel for RustlsTunnel {
    fn set_domain(&mut self, host: &str) -> Result<(), FlowError> {
        let name = ServerName::try_from(host.to_string())
            .map_err(|_| FlowError::tls(format!("invalid server name {:?}", host)))?;
        match ClientConnection::new(self.config.clone(), name) {
            Ok(conn) => {
                self.conn = Some(conn);
                Ok(())
            }
            Err(err) => {
                self.errored = true;
                Err(FlowError::tls(err.to_string()))
            }
        }
    }

    fn handshake(&mut self) -> Result<HandshakeStatus, FlowError> {
        if self.errored {
            return Err(FlowError::tls("engine already failed"));
        }
        let conn = match self.conn.as_ref() {
            Some(conn) => conn,
            None => return Err(FlowError::tls("handshake before set_domain")),
        };
        if conn.is_handshaking() {
            Ok(HandshakeStatus::WantIo)
        } else {
            Ok(HandshakeStatus::Complete)
        }
    }

    fn read_ciphertext(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(conn) = self.conn.as_mut() {
            while conn.wants_write() {
                // Writing into a Vec cannot fail.
                if conn.write_tls(&mut out).is_err() {
                    break;
                }
            }
        }
        out
    }

    fn write_ciphertext(&mut self, data: &[u8]) -> Result<(), FlowError> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(FlowError::tls("ciphertext before set_domain")),
        };
        let mut rd = data;
        let mut plain = Vec::new();
        let mut failure = None;
        while !rd.is_empty() {
            match conn.read_tls(&mut rd) {
                // Reading from a slice cannot fail; 0 means the engine's
                // input buffer is full until it processes what it has.
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match conn.process_new_packets() {
                Ok(state) => {
                    let want = state.plaintext_bytes_to_read();
                    if want > 0 {
                        let start = plain.len();
                        plain.resize(start + want, 0);
                        let mut filled = start;
                        while filled < plain.len() {
                            match conn.reader().read(&mut plain[filled..]) {
                                Ok(0) => break,
                                Ok(n) => filled += n,
                                Err(_) => break,
                            }
                        }
                        plain.truncate(filled);
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        match failure {
            Some(err) => {
                debug!("engine rejected ciphertext: {}", err);
                self.errored = true;
                Err(FlowError::tls(err.to_string()))
            }
            None => {
                self.plain_in.extend_from_slice(&plain);
                Ok(())
            }
        }
    }

    fn has_plaintext(&self) -> bool {
        !self.plain_in.is_empty()
    }

    fn read_plaintext(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.plain_in)
    }

    fn write_plaintext(&mut self, data: &[u8]) {
        if let Some(conn) = self.conn.as_mut() {
            let queued = conn.writer().write_all(data);
            if queued.is_err() {
                self.errored = true;
            }
        }
    }

    fn need_cipher_input(&self) -> bool {
        self.conn.as_ref().map_or(false, |c| c.wants_read())
    }

    fn finished_writing_cipher(&self) -> bool {
        self.conn.as_ref().map_or(true, |c| !c.wants_write())
    }

    fn errored(&self) -> bool {
        self.errored
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.send_close_notify();
        }
    }
}

/// Client-side connector carrying a rustls configuration.
///
/// The default configuration trusts the Mozilla root program via
/// `webpki-roots` and sends no client certificate; custom
/// configurations come in through
/// [`with_config`](RustlsConnector::with_config).
#[derive(Clone)]
pub struct RustlsConnector {
    config: Arc<ClientConfig>,
}

impl RustlsConnector {
    /// A connector trusting the bundled web roots.
    pub fn new() -> RustlsConnector {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        RustlsConnector {
            config: Arc::new(config),
        }
    }

    /// A connector using the given configuration.
    pub fn with_config(config: Arc<ClientConfig>) -> RustlsConnector {
        RustlsConnector { config }
    }

    /// The configuration this connector hands to its tunnels.
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    /// Builds a TLS stage over `next_hop`, ready for
    /// [`connect`](DataFlow::connect). SNI comes from the endpoint the
    /// caller connects to.
    pub fn flow(&self, session: Rc<Session>, next_hop: Box<dyn DataFlow>) -> TlsFlow {
        let tunnel = RustlsTunnel::new(self.config.clone());
        TlsFlow::new(session, Box::new(tunnel), next_hop)
    }
}

impl Default for RustlsConnector {
    fn default() -> RustlsConnector {
        RustlsConnector::new()
    }
}
