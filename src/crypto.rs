use crate::data::Blob;
use crate::error::Result;

/// Which side of the handshake an encryption session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionRole {
    /// The session initiates the handshake (upgrade direction: connector).
    Client,
    /// The session answers the handshake (upgrade direction: acceptor).
    Server,
}

/// Progress of an encryption handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// More peer bytes are required before the session is usable.
    InProgress,
    /// The session is established; `encrypt` and `decrypt` may be used.
    Established,
}

/// An opaque encryption session driven by the stream engine during an
/// upgrade.
///
/// The engine feeds inbound ciphertext to `handshake` until it reports
/// [`HandshakeState::Established`], transmitting whatever `outgoing` bytes
/// each step produces. Once established, application data is routed
/// through `encrypt` and `decrypt`. `shutdown` produces the session's
/// closing bytes for a downgrade.
///
/// The cryptographic algorithm is external to this crate.
pub trait Encryption: Send {
    /// Returns the side this session plays, used to infer the upgrade
    /// direction when the caller does not make it explicit.
    fn role(&self) -> EncryptionRole;

    /// Advances the handshake with whatever ciphertext is available in
    /// `incoming`, appending produced handshake bytes to `outgoing`.
    fn handshake(&mut self, incoming: &mut Blob, outgoing: &mut Blob) -> Result<HandshakeState>;

    /// Consumes `plaintext` and appends the ciphertext rendition to
    /// `ciphertext`.
    fn encrypt(&mut self, plaintext: &mut Blob, ciphertext: &mut Blob) -> Result<()>;

    /// Consumes `ciphertext` and appends the recovered plaintext to
    /// `plaintext`.
    fn decrypt(&mut self, ciphertext: &mut Blob, plaintext: &mut Blob) -> Result<()>;

    /// Cleanly terminates the session, appending closing bytes to
    /// `outgoing`.
    fn shutdown(&mut self, outgoing: &mut Blob) -> Result<()>;

    /// Returns the peer's certificate in the session's own encoding,
    /// once the handshake has produced one.
    fn remote_certificate(&self) -> Option<Blob> {
        None
    }

    /// Returns the session's private key in its own encoding, if it is
    /// willing to disclose it.
    fn private_key(&self) -> Option<Blob> {
        None
    }
}
