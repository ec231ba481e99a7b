//! Target descriptor framing
//!
//! Wire layout, all fields cipher-mutated byte-wise after encoding:
//!
//! ```text
//! +----------+---------+----------+
//! | host_len |  host   |   port   |
//! | u32 BE   | L bytes |  u16 BE  |
//! +----------+---------+----------+
//! ```
//!
//! `host_len ∈ [1, 255]`, `port ∈ [1, 65535]`. The descriptor precedes
//! any payload byte on a tunnel session; the return direction carries
//! no descriptor.

use super::TunnelError;
use crate::cipher::CipherHandle;
use crate::proxy::Target;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encode and cipher-mutate a descriptor.
pub fn encode_descriptor(target: &Target, cipher: &CipherHandle) -> BytesMut {
    let host = target.host().as_bytes();
    let mut buf = BytesMut::with_capacity(4 + host.len() + 2);

    buf.put_u32(host.len() as u32);
    buf.extend_from_slice(host);
    buf.put_u16(target.port());

    cipher.encrypt(&mut buf);
    buf
}

/// Write the encrypted descriptor for `target` to `stream`.
pub async fn write_descriptor<S>(
    stream: &mut S,
    target: &Target,
    cipher: &CipherHandle,
) -> Result<(), TunnelError>
where
    S: AsyncWrite + Unpin,
{
    let buf = encode_descriptor(target, cipher);
    stream.write_all(&buf).await?;
    Ok(())
}

/// Read and decrypt a descriptor from `stream`.
pub async fn read_descriptor<S>(
    stream: &mut S,
    cipher: &CipherHandle,
) -> Result<Target, TunnelError>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    cipher.decrypt(&mut len_buf);
    let host_len = u32::from_be_bytes(len_buf);

    if host_len == 0 || host_len > Target::MAX_HOST_LEN as u32 {
        return Err(TunnelError::InvalidHostLength(host_len));
    }

    let mut host = vec![0u8; host_len as usize];
    stream.read_exact(&mut host).await?;
    cipher.decrypt(&mut host);
    let host = String::from_utf8(host).map_err(|_| TunnelError::InvalidHostEncoding)?;

    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    cipher.decrypt(&mut port_buf);
    let port = u16::from_be_bytes(port_buf);

    Target::new(host, port).map_err(|_| TunnelError::InvalidPort(port))
}
