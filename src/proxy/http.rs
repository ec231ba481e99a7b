//! HTTP proxy request parsing
//!
//! Handles both proxy flavors a browser speaks:
//! - `CONNECT host:port HTTP/1.1` tunnel requests
//! - absolute-URI requests (`GET http://host/path HTTP/1.1`), which are
//!   rewritten to origin-form and replayed through the tunnel

use super::{ProxyError, Target};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Request line length bound.
const MAX_LINE_LEN: usize = 1024;

/// Exact reply for an established CONNECT tunnel.
pub const RESPONSE_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Reject reply for malformed requests and failed hops.
pub const RESPONSE_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// A parsed HTTP proxy request.
#[derive(Debug)]
pub enum HttpRequest {
    /// `CONNECT host:port` tunnel request; headers already consumed.
    Connect { target: Target },
    /// Absolute-URI request, rewritten to origin-form and buffered for
    /// replay as the first tunnel payload.
    Absolute { target: Target, rewritten: Vec<u8> },
}

impl HttpRequest {
    pub fn target(&self) -> &Target {
        match self {
            HttpRequest::Connect { target } => target,
            HttpRequest::Absolute { target, .. } => target,
        }
    }
}

/// Read and classify one HTTP proxy request from `stream`.
///
/// Consumes the request line and all headers. For absolute-URI requests
/// the rewritten request bytes are returned for later forwarding.
pub async fn read_request<S>(stream: &mut S) -> Result<HttpRequest, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let line = read_line(stream).await?;
    if line.is_empty() {
        return Err(ProxyError::MalformedRequest("empty request line".to_string()));
    }

    if line.starts_with("CONNECT ") {
        let target = parse_connect_line(&line)?;
        // Tunnel mode: headers carry nothing we need
        loop {
            if read_line(stream).await?.is_empty() {
                break;
            }
        }
        return Ok(HttpRequest::Connect { target });
    }

    if ["GET ", "POST ", "PUT ", "DELETE "]
        .iter()
        .any(|m| line.starts_with(m))
    {
        let (target, request_line) = parse_absolute_line(&line)?;

        // Buffer the rewritten request, replacing the Host header with
        // the parsed target host.
        let mut rewritten = Vec::with_capacity(MAX_LINE_LEN);
        rewritten.extend_from_slice(request_line.as_bytes());
        rewritten.extend_from_slice(b"\r\n");
        loop {
            let header = read_line(stream).await?;
            if header.is_empty() {
                rewritten.extend_from_slice(b"\r\n");
                break;
            }
            if header.to_ascii_lowercase().starts_with("host:") {
                rewritten.extend_from_slice(format!("Host: {}", target.host()).as_bytes());
            } else {
                rewritten.extend_from_slice(header.as_bytes());
            }
            rewritten.extend_from_slice(b"\r\n");
        }
        return Ok(HttpRequest::Absolute { target, rewritten });
    }

    let method = line.split_whitespace().next().unwrap_or("").to_string();
    Err(ProxyError::UnsupportedMethod(method))
}

/// Parse `CONNECT host:port HTTP/x.y`.
pub fn parse_connect_line(line: &str) -> Result<Target, ProxyError> {
    let mut parts = line.split_whitespace();
    let _method = parts.next();
    let authority = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest(line.to_string()))?;
    if parts.next().is_none() {
        return Err(ProxyError::MalformedRequest(line.to_string()));
    }

    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::MissingPort(authority.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ProxyError::InvalidPort(port.to_string()))?;

    Target::new(host, port)
}

/// Parse `METHOD http://host[:port]/path HTTP/x.y`, returning the
/// target and the origin-form request line `METHOD path HTTP/x.y`.
pub fn parse_absolute_line(line: &str) -> Result<(Target, String), ProxyError> {
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest(line.to_string()))?;
    let url = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest(line.to_string()))?;
    let version = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest(line.to_string()))?;

    let (rest, default_port) = if let Some(rest) = url.strip_prefix("http://") {
        (rest, 80)
    } else if let Some(rest) = url.strip_prefix("https://") {
        (rest, 443)
    } else {
        return Err(ProxyError::UnsupportedScheme(url.to_string()));
    };

    let (host_port, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| ProxyError::InvalidPort(port.to_string()))?;
            (host, port)
        }
        None => (host_port, default_port),
    };

    let target = Target::new(host, port)?;
    let request_line = format!("{} {} {}", method, path, version);
    Ok((target, request_line))
}

/// Read one CRLF-terminated line byte-wise, bounded to [`MAX_LINE_LEN`].
///
/// Byte-wise so nothing past the header block is consumed: whatever the
/// client pipelines after `\r\n\r\n` must stay in the socket for the
/// relay.
async fn read_line<S>(stream: &mut S) -> Result<String, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];

    loop {
        if line.len() >= MAX_LINE_LEN {
            return Err(ProxyError::RequestLineTooLong(MAX_LINE_LEN));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(ProxyError::MalformedRequest(
                "connection closed mid-line".to_string(),
            ));
        }
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            break;
        }
        line.push(byte[0]);
    }

    String::from_utf8(line)
        .map_err(|_| ProxyError::MalformedRequest("non-UTF-8 request line".to_string()))
}
