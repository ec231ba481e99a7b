//! Outbound TCP plumbing
//!
//! Dialing with bounded connect timeouts, and name resolution for the
//! remote endpoint. Numeric IPv4 is accepted directly, otherwise the
//! first A record wins; the tunnel wire only carries IPv4-sized
//! addresses.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect timeout")]
    Timeout,

    #[error("name resolution failed for {0}")]
    Resolve(String),
}

/// Connect to `addr` with a bounded timeout.
pub async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout)??;

    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Connect to a resolved address with a bounded timeout.
pub async fn dial_addr(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout)??;

    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Resolve `host` to an IPv4 socket address.
pub async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::from((ip, port)));
    }

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| TransportError::Resolve(host.to_string()))?;

    addrs
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| TransportError::Resolve(host.to_string()))
}
