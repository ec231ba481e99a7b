//! Local endpoint: the half-proxy the browser talks to
//!
//! The acceptor sniffs the first byte of every connection to pick the
//! protocol state machine, then each session derives its target, dials
//! the remote endpoint, emits the encrypted target descriptor, and
//! relays bytes through the pump.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cipher::CipherHandle;
use crate::config::Config;
use crate::proxy::http::{self, HttpRequest};
use crate::proxy::socks5;
use crate::transport::{self, TransportError};
use crate::tunnel::{run_pump, write_descriptor};

use super::session::{Flavor, Session, SessionRegistry, SessionState};
use super::shutdown::ShutdownSignal;

/// Browser-facing acceptor.
pub struct LocalEndpoint {
    listener: tokio::net::TcpListener,
    config: Arc<Config>,
    cipher: CipherHandle,
    registry: SessionRegistry,
    shutdown: ShutdownSignal,
}

impl LocalEndpoint {
    /// Bind the local listen address.
    pub async fn bind(
        config: Arc<Config>,
        cipher: CipherHandle,
        shutdown: ShutdownSignal,
    ) -> crate::Result<Self> {
        let listener = super::bind_listener(
            &config.local_listen_addr(),
            config.max_connections as u32,
        )?;
        info!("local endpoint listening on {}", config.local_listen_addr());

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

        debug!("local acceptor stopping");
        drop(self.listener);
        self.registry.drain().await;
        info!("local endpoint stopped");
        Ok(())
    }

    fn start_session(&self, stream: TcpStream, peer: SocketAddr) {
        if self.registry.live() >= self.config.max_connections {
            // Resource limit: drop with no response
            warn!("connection limit reached, dropping {}", peer);
            return;
        }

        debug!("new connection from {}", peer);
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

/// Run one client session to completion and mark it closed. Both
/// sockets close when they drop here, exactly once.
async fn drive_session(
    mut client: TcpStream,
    session: Arc<Session>,
    config: Arc<Config>,
    shutdown: ShutdownSignal,
) {
    if let Err(e) = client_session(&mut client, &session, &config, shutdown).await {
        debug!("session {} from {} ended: {}", session.id(), session.peer(), e);
    }
    session.advance(SessionState::Closing);
    session.advance(SessionState::Closed);
}

/// Sniff the protocol and run the matching state machine.
async fn client_session(
    client: &mut TcpStream,
    session: &Arc<Session>,
    config: &Arc<Config>,
    shutdown: ShutdownSignal,
) -> crate::Result<()> {
    // 1-byte non-consuming peek decides the protocol
    let mut first = [0u8; 1];
    let peeked = match tokio::time::timeout(config.timeout(), client.peek(&mut first)).await {
        Ok(result) => result?,
        Err(_) => return Err(TransportError::Timeout.into()),
    };
    if peeked == 0 {
        return Err(crate::proxy::ProxyError::MalformedRequest(
            "connection closed before first byte".to_string(),
        )
        .into());
    }

    if first[0] == socks5::SOCKS_VERSION {
        socks5_session(client, session, config, shutdown).await
    } else {
        http_session(client, session, config, shutdown).await
    }
}

async fn http_session(
    client: &mut TcpStream,
    session: &Arc<Session>,
    config: &Arc<Config>,
    shutdown: ShutdownSignal,
) -> crate::Result<()> {
    let request = match tokio::time::timeout(config.timeout(), http::read_request(client)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            // Protocol reject: tell the client before closing
            client.write_all(http::RESPONSE_BAD_GATEWAY).await.ok();
            return Err(e.into());
        }
        Err(_) => return Err(TransportError::Timeout.into()),
    };

    session.set_flavor(match request {
        HttpRequest::Connect { .. } => Flavor::HttpConnect,
        HttpRequest::Absolute { .. } => Flavor::HttpAbsolute,
    });
    let target = request.target().clone();

    session.advance(SessionState::Connecting);
    let mut tunnel = match transport::dial(&config.tunnel_addr(), config.timeout()).await {
        Ok(tunnel) => tunnel,
        Err(e) => {
            error!("tunnel hop to {} failed: {}", config.tunnel_addr(), e);
            client.write_all(http::RESPONSE_BAD_GATEWAY).await.ok();
            return Err(e.into());
        }
    };

    let cipher = session.cipher().clone();
    write_descriptor(&mut tunnel, &target, &cipher).await?;

    match request {
        HttpRequest::Connect { .. } => {
            client.write_all(http::RESPONSE_ESTABLISHED).await?;
        }
        HttpRequest::Absolute { mut rewritten, .. } => {
            // The rewritten request rides the tunnel as first payload;
            // the client hears nothing until the target answers.
            cipher.encrypt(&mut rewritten);
            tunnel.write_all(&rewritten).await?;
        }
    }

    session.advance(SessionState::Relaying);
    info!(
        "session {} relaying {} -> {} ({})",
        session.id(),
        session.peer(),
        target,
        session.flavor().map(|f| f.to_string()).unwrap_or_default()
    );

    let (outbound, inbound) =
        run_pump(client, &mut tunnel, &cipher, config.buffer_size, shutdown).await;
    debug!(
        "session {} finished: {} bytes out, {} bytes in",
        session.id(),
        outbound,
        inbound
    );
    Ok(())
}

async fn socks5_session(
    client: &mut TcpStream,
    session: &Arc<Session>,
    config: &Arc<Config>,
    shutdown: ShutdownSignal,
) -> crate::Result<()> {
    session.set_flavor(Flavor::Socks5);

    // Rejects send their own reply inside the state machine
    let target = match tokio::time::timeout(config.timeout(), socks5::read_request(client)).await {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(TransportError::Timeout.into()),
    };

    session.advance(SessionState::Connecting);
    let mut tunnel = match transport::dial(&config.tunnel_addr(), config.timeout()).await {
        Ok(tunnel) => tunnel,
        Err(e) => {
            error!("tunnel hop to {} failed: {}", config.tunnel_addr(), e);
            socks5::send_reply(client, socks5::Reply::GeneralFailure)
                .await
                .ok();
            return Err(e.into());
        }
    };

    let cipher = session.cipher().clone();
    write_descriptor(&mut tunnel, &target, &cipher).await?;
    socks5::send_reply(client, socks5::Reply::Succeeded).await?;

    session.advance(SessionState::Relaying);
    info!(
        "session {} relaying {} -> {} (socks5)",
        session.id(),
        session.peer(),
        target
    );

    let (outbound, inbound) =
        run_pump(client, &mut tunnel, &cipher, config.buffer_size, shutdown).await;
    debug!(
        "session {} finished: {} bytes out, {} bytes in",
        session.id(),
        outbound,
        inbound
    );
    Ok(())
}
