//! Network connector for nodes served by a [`NodeAgent`](crate::NodeAgent).
//!
//! [`NetConnector`] opens one TCP connection per operation, sends a single
//! request frame and waits for its response. File content is checked
//! against its blake3 checksum on both ends.
//!
//! An upload whose exchange fails after the request was sent may still have
//! been stored by the agent. The connector then deletes the path again, so a
//! failed upload leaves nothing behind unless that cleanup fails as well
//! ([`ConnectorError::Stranded`]).

use std::future::Future;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use quay_types::TransportType;
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::error::ConnectorError;
use crate::local::write_atomic;
use crate::message::{AgentMessage, Payload, read_frame, write_frame};
use crate::traits::Connector;

/// Maximum frame size: 64 MB. Files are sent whole, so this is also the
/// largest file a net node accepts (minus framing overhead).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Room reserved in a frame for the path and checksum.
const FRAME_OVERHEAD: usize = 64 * 1024;

/// Timeouts applied by [`NetConnector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetOptions {
    /// Limit for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Limit for one request/response exchange once connected.
    pub io_timeout: Duration,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// Connector for a remote node agent at `host:port`.
pub struct NetConnector {
    address: String,
    options: NetOptions,
}

impl NetConnector {
    /// Create a connector for the agent at `address`. No connection is made
    /// until the first operation.
    pub fn new(address: impl Into<String>, options: NetOptions) -> Self {
        Self {
            address: address.into(),
            options,
        }
    }

    async fn connect(&self) -> Result<TcpStream, ConnectorError> {
        match tokio::time::timeout(
            self.options.connect_timeout,
            TcpStream::connect(&self.address),
        )
        .await
        {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(ConnectorError::Connection(format!(
                "{}: {e}",
                self.address
            ))),
            Err(_) => Err(ConnectorError::Timeout(self.options.connect_timeout)),
        }
    }

    /// Send one request and wait for its response.
    async fn request(&self, message: &AgentMessage) -> Result<AgentMessage, ConnectorError> {
        let mut stream = self.connect().await?;
        let exchange = async {
            write_frame(&mut stream, message).await?;
            read_frame(&mut stream)
                .await?
                .ok_or_else(|| ConnectorError::Protocol("connection closed before response".into()))
        };
        with_timeout(self.options.io_timeout, exchange).await
    }

    /// Send a `Put` and wait for its acknowledgement.
    ///
    /// Any failure after the frame was fully written is followed by a
    /// delete of `remote_path`.
    async fn put(&self, remote_path: &str, payload: Payload) -> Result<(), ConnectorError> {
        let request = AgentMessage::Put {
            path: remote_path.to_string(),
            payload,
        };
        let mut stream = self.connect().await?;
        let mut sent = false;
        let exchange = async {
            write_frame(&mut stream, &request).await?;
            sent = true;
            read_frame(&mut stream)
                .await?
                .ok_or_else(|| ConnectorError::Protocol("connection closed before response".into()))
        };
        let result = with_timeout(self.options.io_timeout, exchange).await;

        let cause = match result {
            Ok(AgentMessage::PutAck { result: Ok(()), .. }) => return Ok(()),
            Ok(AgentMessage::PutAck { result: Err(e), .. }) => return Err(ConnectorError::Remote(e)),
            Ok(other) => unexpected("PutAck", &other),
            Err(e) if !sent => return Err(e),
            Err(e) => e,
        };
        Err(self.discard(remote_path, cause).await)
    }

    /// Delete an upload that may have landed despite `cause`.
    async fn discard(&self, remote_path: &str, cause: ConnectorError) -> ConnectorError {
        warn!(remote_path, address = %self.address, %cause, "upload unconfirmed, deleting remote copy");
        match Connector::delete(self, remote_path).await {
            Ok(()) => cause,
            Err(e) => {
                error!(remote_path, address = %self.address, %e, "could not delete unconfirmed upload");
                ConnectorError::Stranded {
                    path: remote_path.to_string(),
                    cause: format!("{cause}; cleanup failed: {e}"),
                }
            }
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, ConnectorError>>,
) -> Result<T, ConnectorError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ConnectorError::Timeout(limit))?
}

fn unexpected(expected: &str, got: &AgentMessage) -> ConnectorError {
    ConnectorError::Protocol(format!("expected {expected}, got: {got:?}"))
}

#[async_trait::async_trait]
impl Connector for NetConnector {
    async fn upload(&self, source: &Path, remote_path: &str) -> Result<(), ConnectorError> {
        let size = tokio::fs::metadata(source).await?.len();
        let max = (MAX_MESSAGE_SIZE - FRAME_OVERHEAD) as u64;
        if size > max {
            return Err(ConnectorError::TooLarge { size, max });
        }

        let data = tokio::fs::read(source).await?;
        self.put(remote_path, Payload::new(data)).await?;
        debug!(remote_path, size, address = %self.address, "uploaded file to agent");
        Ok(())
    }

    async fn download(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<(), ConnectorError> {
        let request = AgentMessage::Get {
            path: remote_path.to_string(),
        };

        match self.request(&request).await? {
            AgentMessage::GetResponse {
                result: Ok(Some(payload)),
                ..
            } => {
                if !payload.verify() {
                    error!(remote_path, address = %self.address, "integrity check failed on downloaded file");
                    return Err(ConnectorError::Integrity(remote_path.to_string()));
                }
                write_atomic(destination, &payload.data).await?;
                debug!(remote_path, size = payload.data.len(), "downloaded file from agent");
                Ok(())
            }
            AgentMessage::GetResponse {
                result: Ok(None), ..
            } => Err(ConnectorError::NotFound(remote_path.to_string())),
            AgentMessage::GetResponse {
                result: Err(e), ..
            } => Err(ConnectorError::Remote(e)),
            other => Err(unexpected("GetResponse", &other)),
        }
    }

    async fn delete(&self, remote_path: &str) -> Result<(), ConnectorError> {
        let request = AgentMessage::Delete {
            path: remote_path.to_string(),
        };

        match self.request(&request).await? {
            AgentMessage::DeleteAck { result: Ok(()), .. } => Ok(()),
            AgentMessage::DeleteAck { result: Err(e), .. } => Err(ConnectorError::Remote(e)),
            other => Err(unexpected("DeleteAck", &other)),
        }
    }

    async fn probe(&self) -> bool {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        match self.request(&AgentMessage::Ping { timestamp }).await {
            Ok(AgentMessage::Pong { timestamp: echoed }) if echoed == timestamp => true,
            Ok(other) => {
                debug!(address = %self.address, ?other, "unexpected probe response");
                false
            }
            Err(e) => {
                debug!(address = %self.address, %e, "probe failed");
                false
            }
        }
    }

    fn transport(&self) -> TransportType {
        TransportType::Net
    }

    fn address(&self) -> &str {
        &self.address
    }
}
