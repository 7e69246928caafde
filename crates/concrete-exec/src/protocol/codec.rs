//! Length-prefixed framing.
//!
//! Each frame is a big-endian `u32` length followed by that many bytes of
//! bincode. A clean end of stream before a length prefix reads as `None`.

use crate::result::{ExecError, ExecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8], max_frame_bytes: usize) -> ExecResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if bytes.len() > max_frame_bytes {
        return Err(ExecError::protocol(format!(
            "outgoing frame of {} bytes exceeds limit of {max_frame_bytes}",
            bytes.len()
        )));
    }
    let len = u32::try_from(bytes.len())
        .map_err(|_| ExecError::protocol("frame length does not fit in u32"))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` on end of stream
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> ExecResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(ExecError::protocol(format!(
            "incoming frame of {len} bytes exceeds limit of {max_frame_bytes}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            ExecError::protocol(format!("stream ended inside a {len} byte frame"))
        } else {
            err.into()
        }
    })?;
    Ok(Some(payload))
}

/// Encode and write a message
pub async fn send<W, T>(writer: &mut W, message: &T, max_frame_bytes: usize) -> ExecResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let bytes = bincode::serialize(message)?;
    write_frame(writer, &bytes, max_frame_bytes).await
}

/// Read and decode a message; `None` on end of stream
pub async fn recv<R, T>(reader: &mut R, max_frame_bytes: usize) -> ExecResult<Option<T>>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    match read_frame(reader, max_frame_bytes).await? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Request};

    const LIMIT: usize = 1024;

    #[tokio::test]
    async fn test_message_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let request = Request {
            id: 7,
            command: Command::AddPaths {
                entries: vec!["samples".to_string()],
            },
        };
        send(&mut a, &request, LIMIT).await.unwrap();
        let received: Request = recv(&mut b, LIMIT).await.unwrap().unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b, LIMIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_protocol_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        let err = read_frame(&mut b, LIMIT).await.unwrap_err();
        assert!(matches!(err, ExecError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_oversized_frames_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        assert!(write_frame(&mut a, &[0u8; 16], 8).await.is_err());
        a.write_all(&(LIMIT as u32 + 1).to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b, LIMIT).await.unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }
}
