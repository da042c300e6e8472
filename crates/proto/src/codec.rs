//! Length-prefixed JSON framing.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes
//! of UTF-8 JSON. The async functions serve the daemon; the `sync_`
//! variants serve the blocking client. Both go through [`encode_message`]
//! and [`decode_message`] so the encoding cannot drift.

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::Message;

/// Size of the frame length header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Hard cap on a single frame body.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Errors produced while framing or parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A frame (outbound or advertised inbound) exceeds [`MAX_MESSAGE_SIZE`].
    #[error("frame too large: {0} bytes (limit {MAX_MESSAGE_SIZE})")]
    FrameTooLarge(usize),
    /// The peer closed the connection in the middle of a frame.
    #[error("connection closed mid-frame")]
    ShortRead,
    /// The frame body was not the JSON we expected.
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
    /// Transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serialize a message into a length-prefixed frame.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parse a frame body into a message.
pub fn decode_message(body: &[u8]) -> Result<Message, CodecError> {
    Ok(serde_json::from_slice(body)?)
}

fn check_length(len: usize) -> Result<usize, CodecError> {
    if len > MAX_MESSAGE_SIZE {
        return Err(CodecError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Write one message and flush it.
pub async fn send_message<W>(writer: &mut W, msg: &Message) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one raw frame body without parsing it.
///
/// Returns `Ok(None)` on a clean end of stream (the peer closed between
/// frames). EOF inside a frame is a [`CodecError::ShortRead`]. The
/// daemon reads frames raw so a malformed payload can be answered with
/// an `Error` message instead of dropping the connection.
pub async fn recv_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(CodecError::ShortRead);
        }
        filled += n;
    }

    let len = check_length(u32::from_be_bytes(header) as usize)?;
    let mut body = vec![0u8; len];
    if let Err(err) = reader.read_exact(&mut body).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(CodecError::ShortRead);
        }
        return Err(err.into());
    }

    Ok(Some(body))
}

/// Read one message.
///
/// Returns `Ok(None)` on a clean end of stream (the peer closed between
/// frames). EOF inside a frame is a [`CodecError::ShortRead`].
pub async fn recv_message<R>(reader: &mut R) -> Result<Option<Message>, CodecError>
where
    R: AsyncRead + Unpin,
{
    match recv_frame(reader).await? {
        Some(body) => Ok(Some(decode_message(&body)?)),
        None => Ok(None),
    }
}

/// Blocking variant of [`send_message`] for the synchronous client.
pub fn sync_send_message<W>(writer: &mut W, msg: &Message) -> Result<(), CodecError>
where
    W: Write,
{
    let frame = encode_message(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Blocking variant of [`recv_message`] for the synchronous client.
pub fn sync_recv_message<R>(reader: &mut R) -> Result<Option<Message>, CodecError>
where
    R: Read,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(CodecError::ShortRead);
        }
        filled += n;
    }

    let len = check_length(u32::from_be_bytes(header) as usize)?;
    let mut body = vec![0u8; len];
    if let Err(err) = reader.read_exact(&mut body) {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(CodecError::ShortRead);
        }
        return Err(err.into());
    }

    Ok(Some(decode_message(&body)?))
}
