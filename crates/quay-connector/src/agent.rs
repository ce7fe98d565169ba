//! Node-side server for the network transport.
//!
//! A [`NodeAgent`] serves one root directory to [`NetConnector`]s. Files are
//! laid out and written exactly as [`LocalConnector`] does, so a directory
//! can move between the two transports.
//!
//! [`NetConnector`]: crate::NetConnector
//! [`LocalConnector`]: crate::LocalConnector

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::error::ConnectorError;
use crate::local::{remove_if_present, resolve, write_atomic};
use crate::message::{AgentMessage, Payload, read_frame, write_frame};

/// TCP server exposing a directory as a storage node.
pub struct NodeAgent {
    listener: TcpListener,
    root: Arc<PathBuf>,
}

impl NodeAgent {
    /// Bind to `addr` and serve `root`, creating the directory if needed.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        root: impl AsRef<Path>,
    ) -> Result<Self, ConnectorError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            root: Arc::new(root),
        })
    }

    /// The address the agent is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, ConnectorError> {
        Ok(self.listener.local_addr()?)
    }

    /// The directory being served.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve connections until the task is dropped.
    pub async fn serve(self) -> Result<(), ConnectorError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve connections until `shutdown` resolves.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn serve_with_shutdown(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ConnectorError> {
        info!(addr = ?self.listener.local_addr().ok(), root = %self.root.display(), "node agent listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("node agent shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let root = Arc::clone(&self.root);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &root).await {
                                warn!(%peer, %e, "agent connection failed");
                            }
                        });
                    }
                    Err(e) => warn!(%e, "failed to accept connection"),
                },
            }
        }
    }
}

/// Answer requests on one connection until the peer closes it.
async fn handle_connection(mut stream: TcpStream, root: &Path) -> Result<(), ConnectorError> {
    while let Some(request) = read_frame(&mut stream).await? {
        let response = dispatch(root, request).await;
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

async fn dispatch(root: &Path, request: AgentMessage) -> AgentMessage {
    match request {
        AgentMessage::Put { path, payload } => {
            let result = store(root, &path, &payload).await.map_err(|e| e.to_string());
            AgentMessage::PutAck { path, result }
        }
        AgentMessage::Get { path } => {
            let result = fetch(root, &path).await.map_err(|e| e.to_string());
            AgentMessage::GetResponse { path, result }
        }
        AgentMessage::Delete { path } => {
            let result = match resolve(root, &path) {
                Ok(target) => remove_if_present(&target).await,
                Err(e) => Err(e),
            }
            .map_err(|e| e.to_string());
            debug!(%path, ok = result.is_ok(), "agent delete");
            AgentMessage::DeleteAck { path, result }
        }
        AgentMessage::Ping { timestamp } => AgentMessage::Pong { timestamp },
        other => {
            warn!(?other, "agent received a response frame as a request");
            AgentMessage::PutAck {
                path: String::new(),
                result: Err("unexpected message".to_string()),
            }
        }
    }
}

async fn store(root: &Path, path: &str, payload: &Payload) -> Result<(), ConnectorError> {
    if !payload.verify() {
        warn!(path, "rejecting upload with bad checksum");
        return Err(ConnectorError::Integrity(path.to_string()));
    }
    let target = resolve(root, path)?;
    write_atomic(&target, &payload.data).await?;
    debug!(path, size = payload.data.len(), "agent stored file");
    Ok(())
}

async fn fetch(root: &Path, path: &str) -> Result<Option<Payload>, ConnectorError> {
    let target = resolve(root, path)?;
    match tokio::fs::read(&target).await {
        Ok(data) => Ok(Some(Payload::new(data))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConnectorError::Io(e)),
    }
}
