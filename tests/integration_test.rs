//! Integration tests for the two-hop tunnel
//!
//! Each test wires a real local endpoint and remote endpoint together
//! over ephemeral ports and drives them with a raw TCP client, so the
//! full path is exercised: protocol handshake, descriptor framing,
//! cipher mutation on both legs, and the bidirectional pump.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use veil_tunnel::cipher;
use veil_tunnel::config::Config;
use veil_tunnel::server::{LocalEndpoint, RemoteEndpoint, Shutdown};

const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

struct TestTunnel {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    shutdown: Shutdown,
    handles: Vec<JoinHandle<veil_tunnel::Result<()>>>,
}

impl TestTunnel {
    async fn stop(self) {
        self.shutdown.trigger();
        for handle in self.handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("endpoint did not stop after shutdown")
                .expect("endpoint task panicked")
                .expect("endpoint returned error");
        }
    }
}

/// Start both endpoints on ephemeral loopback ports.
async fn start_tunnel(mut config: Config) -> TestTunnel {
    let shutdown = Shutdown::new();
    let cipher = cipher::load_or_fallback(
        &config.encryption.library_path,
        &config.encryption.key,
        config.tunnel.xor_key,
    );

    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.tunnel.host = "127.0.0.1".to_string();
    config.tunnel.port = 0;

    let remote = RemoteEndpoint::bind(Arc::new(config.clone()), cipher.clone(), shutdown.signal())
        .await
        .unwrap();
    let remote_addr = remote.local_addr().unwrap();

    // The local endpoint dials whatever port the remote actually bound
    config.tunnel.port = remote_addr.port();
    let local = LocalEndpoint::bind(Arc::new(config), cipher, shutdown.signal())
        .await
        .unwrap();
    let local_addr = local.local_addr().unwrap();

    let handles = vec![tokio::spawn(remote.run()), tokio::spawn(local.run())];
    TestTunnel {
        local_addr,
        remote_addr,
        shutdown,
        handles,
    }
}

/// A target that echoes every byte back.
async fn start_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    (addr, handle)
}

#[tokio::test]
async fn test_http_connect_end_to_end() {
    let (echo_addr, _echo) = start_echo_server().await;
    let tunnel = start_tunnel(Config::default()).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();
    client
        .write_all(format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", echo_addr.port()).as_bytes())
        .await
        .unwrap();

    let mut response = vec![0u8; ESTABLISHED.len()];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(response, ESTABLISHED);

    // Bytes relayed after the reply must arrive byte-identical
    client.write_all(b"ping through tunnel").await.unwrap();
    let mut echoed = [0u8; 19];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping through tunnel");

    tunnel.stop().await;
}

#[tokio::test]
async fn test_absolute_uri_get_rewrites_request() {
    // Target captures the request it sees and answers a fixed response
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = listener.local_addr().unwrap();
    let target = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        request
    });

    let tunnel = start_tunnel(Config::default()).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();
    client
        .write_all(
            format!(
                "GET http://127.0.0.1:{}/bar HTTP/1.1\r\nHost: old\r\n\r\n",
                target_addr.port()
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    // No synthesized reply: the first bytes the client sees are the
    // target's own response
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");

    let seen = target.await.unwrap();
    let seen = String::from_utf8(seen).unwrap();
    assert!(seen.starts_with("GET /bar HTTP/1.1\r\n"), "got: {}", seen);
    assert!(seen.contains("Host: 127.0.0.1\r\n"), "got: {}", seen);
    assert!(!seen.contains("Host: old"), "got: {}", seen);

    tunnel.stop().await;
}

#[tokio::test]
async fn test_socks5_domain_connect_end_to_end() {
    let (echo_addr, _echo) = start_echo_server().await;
    let tunnel = start_tunnel(Config::default()).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();

    // Greeting
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    client.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    // CONNECT localhost:echo_port by domain
    let mut request = vec![0x05, 0x01, 0x00, 0x03, 9];
    request.extend_from_slice(b"localhost");
    request.extend_from_slice(&echo_addr.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    client.write_all(b"socks payload").await.unwrap();
    let mut echoed = [0u8; 13];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"socks payload");

    tunnel.stop().await;
}

#[tokio::test]
async fn test_socks5_unsupported_command_rejected() {
    let tunnel = start_tunnel(Config::default()).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    client.read_exact(&mut method).await.unwrap();

    // BIND is not supported
    client
        .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
        .await
        .unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x07);

    tunnel.stop().await;
}

#[tokio::test]
async fn test_unknown_method_gets_502() {
    let tunnel = start_tunnel(Config::default()).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();
    client.write_all(b"BREW /tea HTTP/1.1\r\n\r\n").await.unwrap();

    let mut response = vec![0u8; BAD_GATEWAY.len()];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(response, BAD_GATEWAY);

    // Session ends after the reject
    let mut rest = [0u8; 1];
    assert_eq!(client.read(&mut rest).await.unwrap(), 0);

    tunnel.stop().await;
}

#[tokio::test]
async fn test_unreachable_target_closes_client() {
    let tunnel = start_tunnel(Config::default()).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();
    // Port 1 on loopback refuses immediately; the remote endpoint sends
    // no response frame, it just closes the tunnel socket
    client
        .write_all(b"CONNECT 127.0.0.1:1 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let mut response = vec![0u8; ESTABLISHED.len()];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(response, ESTABLISHED);

    let mut rest = [0u8; 1];
    assert_eq!(client.read(&mut rest).await.unwrap(), 0);

    tunnel.stop().await;
}

#[tokio::test]
async fn test_malformed_descriptor_closes_tunnel_session() {
    let tunnel = start_tunnel(Config::default()).await;

    // Speak to the remote endpoint directly with a garbage descriptor:
    // all-zero length bytes decrypt to a length way past 255
    let mut rogue = TcpStream::connect(tunnel.remote_addr).await.unwrap();
    rogue.write_all(&[0x00, 0x00, 0x00, 0x00]).await.unwrap();

    let mut buf = [0u8; 1];
    assert_eq!(rogue.read(&mut buf).await.unwrap(), 0);

    tunnel.stop().await;
}

#[tokio::test]
async fn test_connection_limit_drops_without_response() {
    let config = Config {
        max_connections: 1,
        ..Config::default()
    };
    let (echo_addr, _echo) = start_echo_server().await;
    let tunnel = start_tunnel(config).await;

    // First session occupies the only slot
    let mut first = TcpStream::connect(tunnel.local_addr).await.unwrap();
    first
        .write_all(format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", echo_addr.port()).as_bytes())
        .await
        .unwrap();
    let mut response = vec![0u8; ESTABLISHED.len()];
    first.read_exact(&mut response).await.unwrap();

    // Second connection is accepted and immediately dropped, silently
    let mut second = TcpStream::connect(tunnel.local_addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buf))
        .await
        .expect("expected the connection to be closed")
        .unwrap();
    assert_eq!(n, 0);

    tunnel.stop().await;
}

#[tokio::test]
async fn test_cipher_load_failure_falls_back_to_xor() {
    let mut config = Config::default();
    // Both endpoints share the config, so both fall back to the same
    // XOR keystream and the tunnel still works
    config.encryption.library_path = "./no_such_cipher_module".to_string();
    config.tunnel.xor_key = 77;

    let (echo_addr, _echo) = start_echo_server().await;
    let tunnel = start_tunnel(config).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();
    client
        .write_all(format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", echo_addr.port()).as_bytes())
        .await
        .unwrap();

    let mut response = vec![0u8; ESTABLISHED.len()];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(response, ESTABLISHED);

    client.write_all(b"fallback bytes").await.unwrap();
    let mut echoed = [0u8; 14];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"fallback bytes");

    tunnel.stop().await;
}

#[tokio::test]
async fn test_non_involutive_cipher_end_to_end() {
    let mut config = Config::default();
    config.encryption.library_path = "./encryption_plugins/libcaesar_encryption.so".to_string();
    config.encryption.key = "K".to_string();

    let (echo_addr, _echo) = start_echo_server().await;
    let tunnel = start_tunnel(config).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();
    client
        .write_all(format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", echo_addr.port()).as_bytes())
        .await
        .unwrap();

    let mut response = vec![0u8; ESTABLISHED.len()];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(response, ESTABLISHED);

    client.write_all(b"caesar says hi").await.unwrap();
    let mut echoed = [0u8; 14];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"caesar says hi");

    tunnel.stop().await;
}

#[tokio::test]
async fn test_graceful_shutdown_mid_transfer() {
    let (echo_addr, _echo) = start_echo_server().await;
    let tunnel = start_tunnel(Config::default()).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();
    client
        .write_all(format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", echo_addr.port()).as_bytes())
        .await
        .unwrap();
    let mut response = vec![0u8; ESTABLISHED.len()];
    client.read_exact(&mut response).await.unwrap();

    // Session is mid-relay when the signal lands
    client.write_all(b"live data").await.unwrap();
    let mut echoed = [0u8; 9];
    client.read_exact(&mut echoed).await.unwrap();

    tunnel.shutdown.trigger();
    for handle in tunnel.handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("endpoint did not stop within 2s of shutdown")
            .expect("endpoint task panicked")
            .expect("endpoint returned error");
    }

    // The session's sockets were closed by shutdown
    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_large_transfer_preserves_order() {
    let (echo_addr, _echo) = start_echo_server().await;
    let tunnel = start_tunnel(Config::default()).await;

    let mut client = TcpStream::connect(tunnel.local_addr).await.unwrap();
    client
        .write_all(format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", echo_addr.port()).as_bytes())
        .await
        .unwrap();
    let mut response = vec![0u8; ESTABLISHED.len()];
    client.read_exact(&mut response).await.unwrap();

    // 1 MiB, larger than every buffer in the path
    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let (mut read_half, mut write_half) = client.into_split();
    let writer = tokio::spawn(async move {
        write_half.write_all(&payload).await.unwrap();
        write_half
    });

    let mut received = vec![0u8; expected.len()];
    read_half.read_exact(&mut received).await.unwrap();
    assert_eq!(received, expected);

    writer.await.unwrap();
    tunnel.stop().await;
}
