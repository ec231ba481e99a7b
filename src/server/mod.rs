//! Endpoint acceptors and session lifecycle
//!
//! Provides:
//! - the browser-facing local acceptor and its client sessions
//! - the tunnel-facing remote acceptor and its outbound sessions
//! - the session registry and per-session state machine
//! - process-wide shutdown propagation

mod local;
mod remote;
mod session;
mod shutdown;

pub use local::LocalEndpoint;
pub use remote::RemoteEndpoint;
pub use session::{Flavor, Session, SessionRegistry, SessionState};
pub use shutdown::{Shutdown, ShutdownSignal};

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket};

/// Bind a listener with address reuse and a backlog sized to the
/// connection limit.
pub(crate) fn bind_listener(addr: &str, backlog: u32) -> crate::Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|_| crate::Error::Config(format!("invalid listen address: {}", addr)))?;

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;

    Ok(socket.listen(backlog.max(1))?)
}
