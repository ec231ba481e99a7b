//! Remote endpoint: the half-proxy that opens real outbound connections
//!
//! Each tunnel session begins with the encrypted target descriptor;
//! the session resolves the host, dials it, and bridges the two
//! sockets. A failed dial sends no response frame: the local side
//! observes the tunnel socket closing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cipher::CipherHandle;
use crate::config::Config;
use crate::transport::{self, TransportError};
use crate::tunnel::{read_descriptor, run_pump};

use super::session::{Session, SessionRegistry, SessionState};
use super::shutdown::ShutdownSignal;

/// Outbound connect timeout toward the target.
const TARGET_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunnel-facing acceptor.
pub struct RemoteEndpoint {
    listener: tokio::net::TcpListener,
    config: Arc<Config>,
    cipher: CipherHandle,
    registry: SessionRegistry,
    shutdown: ShutdownSignal,
}

impl RemoteEndpoint {
    /// Bind the tunnel listen address.
    pub async fn bind(
        config: Arc<Config>,
        cipher: CipherHandle,
        shutdown: ShutdownSignal,
    ) -> crate::Result<Self> {
        let listener =
            super::bind_listener(&config.tunnel_addr(), config.max_connections as u32)?;
        info!("remote endpoint listening on {}", config.tunnel_addr());

        Ok(Self {
            listener,
            config,
            cipher,
            registry: SessionRegistry::new(),
            shutdown,
        })
    }

    /// The bound address (useful when configured with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until shutdown, then drain every session.
    pub async fn run(mut self) -> crate::Result<()> {
        let mut cleanup = tokio::time::interval(Duration::from_secs(1));
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let registry = self.registry.clone();

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = cleanup.tick() => {
                    registry.reap();
                    continue;
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.start_session(stream, peer),
                Err(e) => error!("accept error: {}", e),
            }
        }

        debug!("remote acceptor stopping");
        drop(self.listener);
        self.registry.drain().await;
        info!("remote endpoint stopped");
        Ok(())
    }

    fn start_session(&self, stream: TcpStream, peer: SocketAddr) {
        if self.registry.live() >= self.config.max_connections {
            warn!("connection limit reached, dropping {}", peer);
            return;
        }

        debug!("tunnel connection from {}", peer);
        let session = self.registry.new_session(peer, self.cipher.clone());
        let config = Arc::clone(&self.config);
        let shutdown = self.shutdown.clone();

        let task_session = Arc::clone(&session);
        let handle = tokio::spawn(async move {
            drive_session(stream, task_session, config, shutdown).await;
        });
        self.registry.insert(session, handle);
    }
}

async fn drive_session(
    mut tunnel: TcpStream,
    session: Arc<Session>,
    config: Arc<Config>,
    shutdown: ShutdownSignal,
) {
    if let Err(e) = tunnel_session(&mut tunnel, &session, &config, shutdown).await {
        debug!("session {} from {} ended: {}", session.id(), session.peer(), e);
    }
    session.advance(SessionState::Closing);
    session.advance(SessionState::Closed);
}

async fn tunnel_session(
    tunnel: &mut TcpStream,
    session: &Arc<Session>,
    config: &Arc<Config>,
    shutdown: ShutdownSignal,
) -> crate::Result<()> {
    let cipher = session.cipher().clone();

    // A silent peer must not hold the session open
    let target =
        match tokio::time::timeout(config.timeout(), read_descriptor(tunnel, &cipher)).await {
            Ok(Ok(target)) => target,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransportError::Timeout.into()),
        };

    session.advance(SessionState::Connecting);
    let addr = transport::resolve_ipv4(target.host(), target.port()).await?;
    let mut outbound = transport::dial_addr(addr, TARGET_CONNECT_TIMEOUT).await?;

    session.advance(SessionState::Relaying);
    info!(
        "session {} bridging {} -> {} ({})",
        session.id(),
        session.peer(),
        target,
        addr
    );

    // Any payload already buffered on the tunnel socket is picked up by
    // the first pump read, so the pump starts immediately.
    let (returned, forwarded) =
        run_pump(&mut outbound, tunnel, &cipher, config.buffer_size, shutdown).await;
    debug!(
        "session {} finished: {} bytes to target, {} bytes back",
        session.id(),
        forwarded,
        returned
    );
    Ok(())
}
