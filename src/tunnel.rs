//! The TLS engine seam.
//!
//! A [`Tunnel`] is an opaque record-layer engine with four byte queues:
//! plaintext in each direction and ciphertext in each direction. It is
//! synchronous and single-threaded; the flow that owns it is the sole
//! driver of its progress, moving ciphertext between the engine and the
//! inner transport and plaintext between the engine and the user.

use crate::error::FlowError;

/// Outcome of one handshake step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// The handshake is complete. Ciphertext may still be queued for
    /// the final flight.
    Complete,
    /// The engine needs ciphertext moved in or out before it can
    /// advance.
    WantIo,
}

/// An opaque TLS engine.
pub trait Tunnel {
    /// Sets the SNI and certificate-validation name. Must be called
    /// before [`handshake`](Tunnel::handshake).
    fn set_domain(&mut self, host: &str) -> Result<(), FlowError>;

    /// Advances the handshake as far as the ciphertext already fed in
    /// allows, queueing any ciphertext the engine wants sent.
    fn handshake(&mut self) -> Result<HandshakeStatus, FlowError>;

    /// Drains queued outbound ciphertext. Empty means nothing to send
    /// right now.
    fn read_ciphertext(&mut self) -> Vec<u8>;

    /// Feeds inbound ciphertext to the engine and lets it decrypt. An
    /// error leaves the engine permanently failed; any partially
    /// decrypted plaintext is discarded.
    fn write_ciphertext(&mut self, data: &[u8]) -> Result<(), FlowError>;

    /// Whether decrypted plaintext is ready to be read.
    fn has_plaintext(&self) -> bool;

    /// Takes all decrypted plaintext queued so far.
    fn read_plaintext(&mut self) -> Vec<u8>;

    /// Queues plaintext for encryption.
    fn write_plaintext(&mut self, data: &[u8]);

    /// Whether the engine cannot make further progress without more
    /// inbound ciphertext.
    fn need_cipher_input(&self) -> bool;

    /// Whether all queued plaintext has been encrypted and its
    /// ciphertext drained by [`read_ciphertext`](Tunnel::read_ciphertext).
    fn finished_writing_cipher(&self) -> bool;

    /// Whether the engine is in a permanent failure state.
    fn errored(&self) -> bool;

    /// Queues the close-notify alert, if the engine supports shutdown.
    /// The default does nothing.
    fn close(&mut self) {}
}
