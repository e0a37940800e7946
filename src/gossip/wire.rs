//! Wire framing for gossip messages
//!
//! Length-prefixed bincode frames: a u32 big-endian length followed by the
//! serialized message. Frames above [`MAX_FRAME_SIZE`] are rejected.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::GossipMessage;
use crate::error::{BootstrapError, BootstrapResult};

/// Upper bound on a single gossip frame
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Write one framed message to the wire
pub async fn write_message<W>(writer: &mut W, message: &GossipMessage) -> BootstrapResult<()>
where
    W: AsyncWrite + Unpin,
{
    let data = bincode::serialize(message)?;

    writer.write_u32(data.len() as u32).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;

    Ok(())
}

/// Read one framed message from the wire.
///
/// Returns `None` when the peer closed the connection cleanly between
/// frames.
pub async fn read_message<R>(reader: &mut R) -> BootstrapResult<Option<GossipMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None); // Connection closed
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(BootstrapError::NetworkingConfig(format!(
            "gossip frame too large: {} bytes",
            len
        )));
    }

    let mut buffer = BytesMut::with_capacity(len);
    buffer.resize(len, 0);
    reader.read_exact(&mut buffer).await?;

    let message = bincode::deserialize(&buffer)?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeUri;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let message = GossipMessage::Join {
            member: NodeUri::new("127.0.0.1", 10101),
        };
        write_message(&mut client, &message).await.unwrap();

        let received = read_message(&mut server).await.unwrap();
        assert_eq!(received, Some(message));
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);

        let received = read_message(&mut server).await.unwrap();
        assert_eq!(received, None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let len = (MAX_FRAME_SIZE as u32) + 1;
        client.write_u32(len).await.unwrap();

        let err = read_message(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}
