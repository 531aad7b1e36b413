//! Wire primitives for the fileflix protocol.
//!
//! All integers are big-endian. Strings are prefixed with a u16 byte length
//! and carry UTF-8. File payloads are raw bytes with a separately declared
//! i64 length and no terminator.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Largest encodable string; bounded by the u16 length prefix.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Read a length-prefixed UTF-8 string from the stream.
pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let len = reader.read_u16().await? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Ok(String::from_utf8(bytes)?)
}

/// Read a big-endian i64 from the stream.
pub async fn read_i64<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i64> {
    Ok(reader.read_i64().await?)
}

/// Read a single-byte boolean from the stream.
pub async fn read_bool<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool> {
    Ok(reader.read_u8().await? != 0)
}

/// Append a length-prefixed string to a response buffer.
pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    if s.len() > MAX_STRING_LEN {
        return Err(Error::StringTooLong {
            len: s.len(),
            max: MAX_STRING_LEN,
        });
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Append a single-byte boolean to a response buffer.
pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(if value { 1 } else { 0 });
}

/// Append a big-endian i64 to a response buffer.
pub fn put_i64(buf: &mut BytesMut, value: i64) {
    buf.put_i64(value);
}

/// Write an assembled response frame and flush it in one go, so a reply is
/// never interleaved with payload bytes on the socket.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Copy exactly `len` payload bytes from the stream into `dest`.
///
/// Stops early if the stream signals end-of-data; returns the number of bytes
/// actually copied so the caller can detect a short payload.
pub async fn copy_payload<R, W>(reader: &mut R, dest: &mut W, len: u64) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut limited = reader.take(len);
    let copied = tokio::io::copy(&mut limited, dest).await?;
    Ok(copied)
}

/// Consume `len` payload bytes from the stream without storing them.
///
/// Used to keep frame alignment after a rejected upload; failing to drain
/// would desynchronize every subsequent command on the connection.
pub async fn drain_payload<R: AsyncRead + Unpin>(reader: &mut R, len: u64) -> Result<u64> {
    let mut sink = tokio::io::sink();
    copy_payload(reader, &mut sink, len).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "hello").unwrap();
        let mut cursor = Cursor::new(buf.to_vec());
        assert_eq!(read_string(&mut cursor).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_empty_string_roundtrip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "").unwrap();
        let mut cursor = Cursor::new(buf.to_vec());
        assert_eq!(read_string(&mut cursor).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_unicode_string_roundtrip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "日本語テスト 🎵").unwrap();
        let mut cursor = Cursor::new(buf.to_vec());
        assert_eq!(read_string(&mut cursor).await.unwrap(), "日本語テスト 🎵");
    }

    #[tokio::test]
    async fn test_string_truncated_stream() {
        // Length prefix claims 10 bytes but only 3 follow.
        let mut cursor = Cursor::new(vec![0, 10, b'a', b'b', b'c']);
        assert!(read_string(&mut cursor).await.is_err());
    }

    #[test]
    fn test_string_too_long() {
        let big = "x".repeat(MAX_STRING_LEN + 1);
        let mut buf = BytesMut::new();
        assert!(matches!(
            put_string(&mut buf, &big),
            Err(Error::StringTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn test_i64_roundtrip() {
        let mut buf = BytesMut::new();
        put_i64(&mut buf, -123_456_789);
        let mut cursor = Cursor::new(buf.to_vec());
        assert_eq!(read_i64(&mut cursor).await.unwrap(), -123_456_789);
    }

    #[tokio::test]
    async fn test_bool_roundtrip() {
        let mut buf = BytesMut::new();
        put_bool(&mut buf, true);
        put_bool(&mut buf, false);
        let mut cursor = Cursor::new(buf.to_vec());
        assert!(read_bool(&mut cursor).await.unwrap());
        assert!(!read_bool(&mut cursor).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_payload_exact() {
        let mut cursor = Cursor::new(b"hello world".to_vec());
        let mut dest = Vec::new();
        let copied = copy_payload(&mut cursor, &mut dest, 5).await.unwrap();
        assert_eq!(copied, 5);
        assert_eq!(dest, b"hello");

        // The remainder is still readable.
        let drained = drain_payload(&mut cursor, 6).await.unwrap();
        assert_eq!(drained, 6);
    }

    #[tokio::test]
    async fn test_copy_payload_short_stream() {
        let mut cursor = Cursor::new(b"abc".to_vec());
        let mut dest = Vec::new();
        let copied = copy_payload(&mut cursor, &mut dest, 100).await.unwrap();
        assert_eq!(copied, 3);
    }

    #[tokio::test]
    async fn test_drain_preserves_framing() {
        // Payload followed by a command token; draining must leave the
        // token readable.
        let mut buf = BytesMut::new();
        buf.put_slice(b"PAYLOAD!");
        put_string(&mut buf, "HEARTBEAT").unwrap();
        let mut cursor = Cursor::new(buf.to_vec());

        assert_eq!(drain_payload(&mut cursor, 8).await.unwrap(), 8);
        assert_eq!(read_string(&mut cursor).await.unwrap(), "HEARTBEAT");
    }
}
