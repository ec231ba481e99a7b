//! SOCKS5 handshake (RFC 1928 subset)
//!
//! No authentication, CONNECT only, IPv4 and DOMAIN address types.

use super::{ProxyError, Target};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// SOCKS5 version
pub const SOCKS_VERSION: u8 = 0x05;

/// "No authentication" method
const METHOD_NO_AUTH: u8 = 0x00;

/// "No acceptable methods" marker
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// CONNECT command
const CMD_CONNECT: u8 = 0x01;

/// Address types
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;

/// Reply codes
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    CommandNotSupported = 0x07,
}

/// Run the greeting + request phases and return the requested target.
///
/// Writes the method-selection reply itself; protocol rejects also send
/// the matching reply before returning the error. The success reply is
/// *not* sent here: the caller sends it only after the tunnel hop is up.
pub async fn read_request<S>(stream: &mut S) -> Result<Target, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handle_greeting(stream).await?;
    handle_connect_request(stream).await
}

/// Greeting: `VER NMETHODS METHODS...`; accept only "no auth".
async fn handle_greeting<S>(stream: &mut S) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS_VERSION {
        return Err(ProxyError::InvalidSocksVersion(header[0]));
    }
    let nmethods = header[1] as usize;
    if nmethods == 0 {
        return Err(ProxyError::NoAcceptableAuth);
    }

    let mut methods = [0u8; 255];
    stream.read_exact(&mut methods[..nmethods]).await?;

    if !methods[..nmethods].contains(&METHOD_NO_AUTH) {
        stream
            .write_all(&[SOCKS_VERSION, METHOD_NO_ACCEPTABLE])
            .await?;
        return Err(ProxyError::NoAcceptableAuth);
    }

    stream.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;
    Ok(())
}

/// Request: `VER CMD RSV ATYP ADDR PORT`; CONNECT to IPv4 or domain.
async fn handle_connect_request<S>(stream: &mut S) -> Result<Target, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS_VERSION {
        return Err(ProxyError::InvalidSocksVersion(header[0]));
    }
    let cmd = header[1];
    let atyp = header[3];

    if cmd != CMD_CONNECT {
        send_reply(stream, Reply::CommandNotSupported).await?;
        return Err(ProxyError::UnsupportedCommand(cmd));
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let len = len[0] as usize;
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            String::from_utf8(domain).map_err(|_| {
                ProxyError::MalformedRequest("non-UTF-8 domain name".to_string())
            })?
        }
        other => {
            send_reply(stream, Reply::CommandNotSupported).await?;
            return Err(ProxyError::UnsupportedAddressType(other));
        }
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);

    match Target::new(host, port) {
        Ok(target) => Ok(target),
        Err(e) => {
            send_reply(stream, Reply::GeneralFailure).await?;
            Err(e)
        }
    }
}

/// Send a reply with the bind address zeroed (`0.0.0.0:0`).
pub async fn send_reply<S>(stream: &mut S, reply: Reply) -> Result<(), ProxyError>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[
            SOCKS_VERSION,
            reply as u8,
            0x00,
            ATYP_IPV4,
            0,
            0,
            0,
            0,
            0,
            0,
        ])
        .await?;
    Ok(())
}
