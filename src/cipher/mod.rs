//! Symmetric cipher modules
//!
//! Every byte that crosses the tunnel hop is mutated in place by a
//! cipher. Operations are named for their wire direction: [`Cipher::encrypt`]
//! is applied to bytes headed onto the tunnel wire, [`Cipher::decrypt`] to
//! bytes coming off it. Both endpoints use the same pairing, so the
//! round trip is the identity even for ciphers that are not their own
//! inverse.

mod caesar;
mod loader;
mod xor;

pub use caesar::CaesarCipher;
pub use loader::{load_cipher, load_or_fallback, CipherHandle};
pub use xor::XorCipher;

use thiserror::Error;

/// Cipher errors
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("cipher module not found: {0}")]
    ModuleNotFound(String),

    #[error("empty cipher key")]
    EmptyKey,
}

/// An in-place symmetric cipher.
///
/// Implementations must be deterministic given the key and must satisfy
/// `decrypt(encrypt(x)) == x` for every byte string `x`. A single handle
/// is shared by every session in the process, so implementations must be
/// safe to call concurrently; the built-in ciphers are stateless after
/// construction.
pub trait Cipher: Send + Sync + std::fmt::Debug {
    /// Mutate `data` for the outbound wire direction.
    fn encrypt(&self, data: &mut [u8]);

    /// Reverse the outbound mutation.
    fn decrypt(&self, data: &mut [u8]);

    /// Algorithm name.
    fn name(&self) -> &'static str;

    /// Algorithm version.
    fn version(&self) -> &'static str;
}
