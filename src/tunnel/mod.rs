//! Tunnel hop: descriptor framing and the bidirectional data pump
//!
//! Every tunnel session starts with a target descriptor
//! (`host_len + host + port`, cipher-mutated byte-wise); everything
//! after it is an unframed, cipher-mutated byte stream relayed by the
//! pump.

mod descriptor;
mod pump;

pub use descriptor::{encode_descriptor, read_descriptor, write_descriptor};
pub use pump::run_pump;

use thiserror::Error;

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid host length in descriptor: {0}")]
    InvalidHostLength(u32),

    #[error("invalid port in descriptor: {0}")]
    InvalidPort(u16),

    #[error("host is not valid UTF-8")]
    InvalidHostEncoding,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
