//! Length-prefixed JSON framing.
//!
//! [`encode`] produces one frame; [`FrameDecoder`] turns an arbitrary byte
//! stream back into messages. The decoder buffers partial frames across
//! `feed` calls: fewer than four header bytes, or a header whose body has
//! not fully arrived, is an incomplete frame, not an error. A declared
//! length above [`MAX_FRAME_LEN`] is fatal: the stream offset can no longer
//! be trusted and the connection must be dropped.

use crate::message::Message;

/// Length prefix size in bytes.
pub const HEADER_LEN: usize = 4;

/// Maximum frame body size (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Framing errors. All variants are fatal for the connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Encoded body, or a declared inbound length, exceeds [`MAX_FRAME_LEN`].
    #[error("message too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Frame body is not valid JSON for a [`Message`].
    #[error("invalid frame payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a message into a single length-prefixed frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame decoder with an internal reassembly buffer.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append stream bytes and drain every complete frame.
    ///
    /// Returns all messages whose frames are now complete; trailing partial
    /// bytes stay buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Message>, CodecError> {
        self.buf.extend_from_slice(data);
        let mut messages = Vec::new();
        while self.buf.len() >= HEADER_LEN {
            let len =
                u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
            if len > MAX_FRAME_LEN {
                return Err(CodecError::FrameTooLarge(len));
            }
            let total = HEADER_LEN + len;
            if self.buf.len() < total {
                break;
            }
            messages.push(serde_json::from_slice(&self.buf[HEADER_LEN..total])?);
            self.buf.drain(..total);
        }
        Ok(messages)
    }

    /// Bytes currently buffered without a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
