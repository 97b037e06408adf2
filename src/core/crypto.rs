//! Stream cipher seam.
//!
//! The game's cipher is stateful per direction and works in place on the
//! bytes after the length prefix. The proxy only needs the two operations
//! below; the algorithm itself is supplied by the embedding application.

use crate::core::packet::Direction;

/// Per-connection, per-direction in-place stream cipher
pub trait CryptoEngine: Send {
    /// Encrypt `buf` in place for traffic travelling in `direction`
    fn encrypt(&mut self, direction: Direction, buf: &mut [u8]);

    /// Decrypt `buf` in place for traffic travelling in `direction`
    fn decrypt(&mut self, direction: Direction, buf: &mut [u8]);
}

/// Cipher that leaves bytes untouched, for plaintext deployments and tests
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCipher;

impl CryptoEngine for NullCipher {
    fn encrypt(&mut self, _direction: Direction, _buf: &mut [u8]) {}

    fn decrypt(&mut self, _direction: Direction, _buf: &mut [u8]) {}
}

/// Builds a fresh cipher for every relayed connection
pub trait CipherFactory: Send + Sync {
    /// Create the cipher state for a new connection
    fn create(&self) -> Box<dyn CryptoEngine>;
}

impl CipherFactory for NullCipher {
    fn create(&self) -> Box<dyn CryptoEngine> {
        Box::new(NullCipher)
    }
}
