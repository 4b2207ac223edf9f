//! `CONNECT <port>` / `OK <port>` emulation handshake.
//!
//! Firecracker exposes guest vsock ports as Unix sockets on the host, and
//! the connecting side announces the target port with an ASCII `CONNECT`
//! line before any stream bytes flow. Real vsock performs no handshake.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::AgentError;

const MAX_LINE_LEN: usize = 64;

/// Consume the peer's `CONNECT <port>` line and acknowledge with
/// `OK <port>`. Anything else is a handshake error and the caller closes
/// the connection.
pub async fn emulation_handshake<S>(stream: &mut S) -> Result<u32, AgentError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte).await? == 0 {
            return Err(AgentError::Handshake(lossy(&line)));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_LINE_LEN {
            return Err(AgentError::Handshake(lossy(&line)));
        }
    }

    let line = lossy(&line);
    let port = line
        .trim_end()
        .strip_prefix("CONNECT ")
        .and_then(|p| p.trim().parse::<u32>().ok())
        .ok_or_else(|| AgentError::Handshake(line.clone()))?;

    stream.write_all(format!("OK {port}\n").as_bytes()).await?;
    debug!(port, "emulation handshake complete");
    Ok(port)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_connect_and_replies_ok() {
        let (mut near, mut far) = tokio::io::duplex(256);
        far.write_all(b"CONNECT 1000\n").await.unwrap();

        let port = emulation_handshake(&mut near).await.unwrap();
        assert_eq!(port, 1000);

        let mut reply = [0u8; 8];
        far.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"OK 1000\n");
    }

    #[tokio::test]
    async fn tolerates_carriage_return() {
        let (mut near, mut far) = tokio::io::duplex(256);
        far.write_all(b"CONNECT 1024\r\n").await.unwrap();
        assert_eq!(emulation_handshake(&mut near).await.unwrap(), 1024);
    }

    #[tokio::test]
    async fn rejects_unexpected_lines() {
        let (mut near, mut far) = tokio::io::duplex(256);
        far.write_all(b"GET / HTTP/1.1\n").await.unwrap();

        let err = emulation_handshake(&mut near).await.unwrap_err();
        assert!(matches!(err, AgentError::Handshake(line) if line.starts_with("GET")));
    }

    #[tokio::test]
    async fn rejects_eof_before_newline() {
        let (mut near, mut far) = tokio::io::duplex(256);
        far.write_all(b"CONNECT 10").await.unwrap();
        drop(far);

        assert!(matches!(
            emulation_handshake(&mut near).await.unwrap_err(),
            AgentError::Handshake(_)
        ));
    }

    #[tokio::test]
    async fn rejects_unbounded_lines() {
        let (mut near, mut far) = tokio::io::duplex(256);
        far.write_all(&[b'x'; 128]).await.unwrap();

        assert!(matches!(
            emulation_handshake(&mut near).await.unwrap_err(),
            AgentError::Handshake(_)
        ));
    }
}
