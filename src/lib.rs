//! # Veil Tunnel
//!
//! An obfuscated two-hop TCP proxy. A **local endpoint** accepts HTTP
//! (CONNECT and absolute-URI) or SOCKS5 connections from a browser,
//! derives the intended target, and forwards the byte stream to a
//! **remote endpoint** over a single obfuscated hop. The remote endpoint
//! opens the real outbound connection and bridges the two sockets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐  HTTP / SOCKS5  ┌────────────┐  cipher-mutated  ┌─────────────┐
//! │ Browser │ ──────────────▶ │ Local      │ ───────────────▶ │ Remote      │ ──▶ target
//! │         │ ◀────────────── │ endpoint   │ ◀─────────────── │ endpoint    │ ◀── target
//! └─────────┘                 └────────────┘    tunnel hop    └─────────────┘
//! ```
//!
//! Every tunnel session opens with a target descriptor frame
//! (`host_len + host + port`, cipher-mutated byte-wise); after that both
//! endpoints act as a dumb transparent conduit. The cipher is selected
//! from the configured module path, with a single-byte XOR keystream as
//! fallback so mismatched deployments still interoperate.

pub mod cipher;
pub mod config;
pub mod proxy;
pub mod server;
pub mod transport;
pub mod tunnel;

pub use config::Config;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cipher error: {0}")]
    Cipher(#[from] cipher::CipherError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),
}
