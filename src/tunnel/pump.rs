//! Bidirectional data pump
//!
//! Relays bytes between a session's two sockets until EOF, an
//! unrecoverable error, or shutdown. One side is the cipher-mutated
//! tunnel wire: bytes written to it are encrypted, bytes read from it
//! are decrypted. Both directions are driven concurrently by one task,
//! so a write stalled on backpressure in one direction never starves
//! the other. Writes go through `write_all`, which completes short
//! writes before the next read is issued; per-direction ordering
//! follows from each socket having exactly one reader.

use crate::cipher::CipherHandle;
use crate::server::ShutdownSignal;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Pump bytes between `plain` and `ciphered` until either side ends.
///
/// Returns `(plain_to_ciphered, ciphered_to_plain)` byte totals. Both
/// write halves are shut down on exit; transport errors end the relay
/// and are logged, never propagated.
pub async fn run_pump<P, C>(
    plain: P,
    ciphered: C,
    cipher: &CipherHandle,
    buffer_size: usize,
    mut shutdown: ShutdownSignal,
) -> (u64, u64)
where
    P: AsyncRead + AsyncWrite + Unpin,
    C: AsyncRead + AsyncWrite + Unpin,
{
    let (mut plain_rd, mut plain_wr) = tokio::io::split(plain);
    let (mut ciphered_rd, mut ciphered_wr) = tokio::io::split(ciphered);

    let mut outbound: u64 = 0;
    let mut inbound: u64 = 0;

    {
        let forward = async {
            let mut buf = vec![0u8; buffer_size.max(1)];
            loop {
                match plain_rd.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        cipher.encrypt(&mut buf[..n]);
                        if let Err(e) = ciphered_wr.write_all(&buf[..n]).await {
                            debug!("tunnel-side write ended: {}", e);
                            break;
                        }
                        outbound += n as u64;
                    }
                    Err(e) => {
                        debug!("plain-side read ended: {}", e);
                        break;
                    }
                }
            }
        };

        let backward = async {
            let mut buf = vec![0u8; buffer_size.max(1)];
            loop {
                match ciphered_rd.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        cipher.decrypt(&mut buf[..n]);
                        if let Err(e) = plain_wr.write_all(&buf[..n]).await {
                            debug!("plain-side write ended: {}", e);
                            break;
                        }
                        inbound += n as u64;
                    }
                    Err(e) => {
                        debug!("tunnel-side read ended: {}", e);
                        break;
                    }
                }
            }
        };

        // First direction to finish ends the relay; the session owns
        // both sockets exclusively, so tearing down the other leg here
        // is safe.
        tokio::select! {
            _ = forward => {}
            _ = backward => {}
            _ = shutdown.recv() => {}
        }
    }

    plain_wr.shutdown().await.ok();
    ciphered_wr.shutdown().await.ok();

    (outbound, inbound)
}
