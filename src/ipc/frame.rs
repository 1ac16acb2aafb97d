use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ipc::crypto::{MAX_PLAINTEXT_LEN, NONCE_LEN};
use crate::ipc::IpcError;

/// Upper bound for an encrypted frame on the wire: max plaintext plus the
/// IV and the 128-bit GCM tag.
pub const MAX_FRAME_LEN: usize = MAX_PLAINTEXT_LEN + NONCE_LEN + 16;

/// Writes `u32 length || payload` (big-endian length).
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(IpcError::InvalidFrame(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a `u32 length || payload` frame, rejecting oversize lengths before
/// allocating.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, IpcError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(IpcError::InvalidFrame(format!(
            "declared frame of {len} bytes exceeds limit"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Writes `u16 length || utf8`, the short form used during the handshake.
pub async fn write_short_string<W>(writer: &mut W, s: &str) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(IpcError::InvalidFrame("handshake string too long".into()));
    }
    writer.write_u16(bytes.len() as u16).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a `u16 length || utf8` handshake string.
pub async fn read_short_string<R>(reader: &mut R) -> Result<String, IpcError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).map_err(|_| IpcError::InvalidFrame("handshake not utf8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"payload").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn oversize_declared_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(IpcError::InvalidFrame(_))
        ));
    }

    #[tokio::test]
    async fn short_string_roundtrip() {
        let mut buf = Vec::new();
        write_short_string(&mut buf, "OK").await.unwrap();
        assert_eq!(buf[..2], [0, 2]);
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_short_string(&mut cursor).await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn truncated_frame_errors() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}
