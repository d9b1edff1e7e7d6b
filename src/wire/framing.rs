//! Framed read/write over any `AsyncRead + AsyncWrite` transport.
//!
//! Read contract: read exactly 8 bytes for the header; if the peer closes
//! with fewer, that is [`super::Error::PeerClosed`]. Then read
//! `total_size - 8` bytes, looping over partial receives.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Error, Result};

/// Size of the size-plus-tag header common to every frame.
pub const HEADER_LEN: usize = 8 + 2;

/// Reads one complete framed message and returns `(tag, body)`, where `tag`
/// is the opcode (requests) or status (responses) and `body` is everything
/// after the 10-byte header.
pub async fn read_frame<R>(reader: &mut R) -> Result<(u16, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; 8];
    match reader.read_exact(&mut size_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::PeerClosed);
        }
        Err(err) => return Err(Error::Io(err)),
    }

    let total_size = u64::from_le_bytes(size_buf) as usize;
    if total_size < 10 {
        return Err(Error::Malformed("total_size smaller than header"));
    }

    let mut tag_buf = [0u8; 2];
    reader.read_exact(&mut tag_buf).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::PeerClosed
        } else {
            Error::Io(err)
        }
    })?;
    let tag = u16::from_le_bytes(tag_buf);

    let body_len = total_size - HEADER_LEN;
    let mut body = vec![0u8; body_len];
    let mut read_so_far = 0;
    while read_so_far < body_len {
        let n = reader.read(&mut body[read_so_far..]).await?;
        if n == 0 {
            return Err(Error::PeerClosed);
        }
        read_so_far += n;
    }

    Ok((tag, body))
}

/// Writes a fully framed message (as produced by [`super::MessageBuilder::finish`]).
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MessageBuilder;

    #[tokio::test]
    async fn round_trips_through_an_in_memory_pipe() {
        let mut b = MessageBuilder::new();
        b.tag(10);
        b.u32(7);
        let frame = b.finish();

        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &frame).await.unwrap();
        let (tag, body) = read_frame(&mut server).await.unwrap();
        assert_eq!(tag, 10);
        assert_eq!(body.len(), 4);
    }

    #[tokio::test]
    async fn empty_stream_is_peer_closed() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(Error::PeerClosed)));
    }
}
