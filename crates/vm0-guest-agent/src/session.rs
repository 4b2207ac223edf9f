//! Single-connection message loop.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use vm0_proto::{encode, FrameDecoder, Message};

use crate::error::AgentError;
use crate::handler;

/// Bytes read per loop iteration.
const READ_CHUNK: usize = 4096;

/// Run the control loop until EOF or a fatal error.
///
/// Exactly one `ready` frame is sent before anything is read. Handling is
/// strictly sequential: a long `exec` blocks the loop, bounded by its own
/// timeout. The stream is dropped, and the socket closed, on every exit
/// path.
pub async fn run<S>(stream: S) -> Result<(), AgentError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = FrameDecoder::new();

    writer.write_all(&encode(&Message::ready())?).await?;
    info!("sent ready signal");

    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            info!("host disconnected");
            return Ok(());
        }
        for msg in decoder.feed(&buf[..n])? {
            if let Some(response) = handler::handle(msg).await {
                writer.write_all(&encode(&response)?).await?;
            }
        }
    }
}
