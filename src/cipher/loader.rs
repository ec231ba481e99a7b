//! Cipher module loader
//!
//! Algorithms ship as named modules selected by the configured library
//! path. The path is normalized the way a dynamic loader would treat it
//! (platform suffix appended when missing, `lib` prefix stripped) and
//! the resulting stem picks the algorithm from the built-in registry.
//! A load failure is not fatal: the endpoint falls back to a
//! single-byte XOR keystream so tunnels still function between
//! endpoints configured with matching fallbacks.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::{CaesarCipher, Cipher, CipherError, XorCipher};

/// Shared reference to the process-wide cipher.
pub type CipherHandle = Arc<dyn Cipher>;

#[cfg(windows)]
const MODULE_SUFFIX: &str = ".dll";
#[cfg(not(windows))]
const MODULE_SUFFIX: &str = ".so";

/// Load the cipher named by `library_path`, keyed with `key`.
pub fn load_cipher(library_path: &str, key: &[u8]) -> Result<CipherHandle, CipherError> {
    let stem = module_stem(library_path)
        .ok_or_else(|| CipherError::ModuleNotFound(library_path.to_string()))?;

    match stem.as_str() {
        "xor_encryption" => Ok(Arc::new(XorCipher::new(key)?)),
        "caesar_encryption" => Ok(Arc::new(CaesarCipher::new(key)?)),
        _ => Err(CipherError::ModuleNotFound(library_path.to_string())),
    }
}

/// Load the configured cipher, falling back to the XOR keystream with
/// `xor_key` when loading fails.
pub fn load_or_fallback(library_path: &str, key: &str, xor_key: u8) -> CipherHandle {
    match load_cipher(library_path, key.as_bytes()) {
        Ok(cipher) => {
            info!(
                "loaded cipher module {} v{} from {}",
                cipher.name(),
                cipher.version(),
                library_path
            );
            cipher
        }
        Err(e) => {
            warn!("cipher module load failed ({e}), falling back to XOR keystream");
            Arc::new(XorCipher::with_byte(xor_key))
        }
    }
}

/// Normalize a module path to its algorithm stem: append the platform
/// suffix when absent, then strip the directory, the suffix, and any
/// `lib` prefix.
fn module_stem(library_path: &str) -> Option<String> {
    if library_path.is_empty() {
        return None;
    }

    let mut path = library_path.to_string();
    if !path.contains(MODULE_SUFFIX) {
        path.push_str(MODULE_SUFFIX);
    }

    let stem = Path::new(&path).file_stem()?.to_str()?;
    let stem = stem.strip_prefix("lib").unwrap_or(stem);
    Some(stem.to_string())
}
