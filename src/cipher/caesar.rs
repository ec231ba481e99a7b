//! Byte-wise Caesar shift

use super::{Cipher, CipherError};

/// Caesar cipher shifting every byte by the first byte of the key.
///
/// Unlike XOR this is not an involution, so it exercises the
/// directional encrypt/decrypt pairing along the tunnel.
#[derive(Debug)]
pub struct CaesarCipher {
    shift: u8,
}

impl CaesarCipher {
    /// Create from a key string; the first byte is the shift.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        let shift = *key.first().ok_or(CipherError::EmptyKey)?;
        Ok(Self { shift })
    }
}

impl Cipher for CaesarCipher {
    fn encrypt(&self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = byte.wrapping_add(self.shift);
        }
    }

    fn decrypt(&self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = byte.wrapping_sub(self.shift);
        }
    }

    fn name(&self) -> &'static str {
        "Caesar"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }
}
