//! Protocol messages between a [`NetConnector`](crate::NetConnector) and a
//! [`NodeAgent`](crate::NodeAgent).
//!
//! Every message travels as a 4-byte big-endian length prefix followed by
//! the postcard-encoded payload. Each request gets exactly one response on
//! the same TCP connection.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ConnectorError;
use crate::net::MAX_MESSAGE_SIZE;

/// File bytes together with their blake3 checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Raw file content.
    pub data: Vec<u8>,
    /// `blake3(data)`.
    pub checksum: [u8; 32],
}

impl Payload {
    /// Wrap `data`, computing its checksum.
    pub fn new(data: Vec<u8>) -> Self {
        let checksum = blake3::hash(&data).into();
        Self { data, checksum }
    }

    /// Whether the data still matches its checksum.
    pub fn verify(&self) -> bool {
        <[u8; 32]>::from(blake3::hash(&self.data)) == self.checksum
    }
}

/// Messages exchanged with a node agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentMessage {
    /// Store a file (expects [`AgentMessage::PutAck`]).
    ///
    /// The agent checks the checksum before publishing the file.
    Put {
        /// Logical path of the file.
        path: String,
        /// File content.
        payload: Payload,
    },

    /// Outcome of a [`AgentMessage::Put`].
    PutAck {
        /// Path that was stored.
        path: String,
        /// `Err` carries the agent's error message.
        result: Result<(), String>,
    },

    /// Fetch a file (expects [`AgentMessage::GetResponse`]).
    Get {
        /// Logical path of the file.
        path: String,
    },

    /// Response to a [`AgentMessage::Get`].
    GetResponse {
        /// Path that was requested.
        path: String,
        /// `Ok(None)` if the agent does not hold the file.
        result: Result<Option<Payload>, String>,
    },

    /// Delete a file (expects [`AgentMessage::DeleteAck`]).
    Delete {
        /// Logical path of the file.
        path: String,
    },

    /// Outcome of a [`AgentMessage::Delete`].
    DeleteAck {
        /// Path that was deleted.
        path: String,
        /// `Err` carries the agent's error message.
        result: Result<(), String>,
    },

    /// Reachability check.
    Ping {
        /// Timestamp (millis since epoch) when the ping was sent.
        timestamp: u64,
    },

    /// Response to a [`AgentMessage::Ping`].
    Pong {
        /// Timestamp from the original ping.
        timestamp: u64,
    },
}

/// Write one length-prefixed frame.
pub(crate) async fn write_frame<W>(writer: &mut W, message: &AgentMessage) -> Result<(), ConnectorError>
where
    W: AsyncWrite + Unpin,
{
    let payload = postcard::to_allocvec(message)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ConnectorError::TooLarge {
            size: payload.len() as u64,
            max: MAX_MESSAGE_SIZE as u64,
        });
    }
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `None` if the peer closed the connection before a new frame began.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<AgentMessage>, ConnectorError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ConnectorError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(ConnectorError::Protocol(format!(
            "message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(postcard::from_bytes(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = AgentMessage::Put {
            path: "a/b".into(),
            payload: Payload::new(b"frame data".to_vec()),
        };

        write_frame(&mut a, &msg).await.unwrap();
        let got = read_frame(&mut b).await.unwrap();
        assert_eq!(got, Some(msg));
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof_is_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let result = read_frame(&mut b).await;
        assert!(matches!(result, Err(ConnectorError::Protocol(_))));
    }

    #[test]
    fn test_payload_verify_detects_tampering() {
        let mut payload = Payload::new(b"original".to_vec());
        assert!(payload.verify());
        payload.data[0] ^= 0xff;
        assert!(!payload.verify());
    }
}
