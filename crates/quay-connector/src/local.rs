//! Local filesystem connector.
//!
//! A node is a directory; each file lives at `{root}/{location}` where the
//! location is the logical path with its leading `/` stripped.

use std::path::{Path, PathBuf};

use quay_types::{TransportType, location_for};
use tracing::{debug, warn};

use crate::error::ConnectorError;
use crate::traits::Connector;

/// Connector for a node that is a directory on the local filesystem.
///
/// Writes are atomic: bytes are copied to a temporary sibling first, then
/// renamed into place. A failed upload removes its temporary file, so the
/// node never holds a half-written object.
pub struct LocalConnector {
    root: PathBuf,
    address: String,
}

impl LocalConnector {
    /// Create a connector rooted at `root`.
    ///
    /// The directory is not created; [`Connector::probe`] reports whether it
    /// exists.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let address = root.display().to_string();
        Self { root, address }
    }

    /// Create a connector rooted at `root`, creating the directory if needed.
    pub fn create(root: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self::new(root))
    }

    /// The directory this connector stores files in.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl Connector for LocalConnector {
    async fn upload(&self, source: &Path, remote_path: &str) -> Result<(), ConnectorError> {
        let target = resolve(&self.root, remote_path)?;
        copy_atomic(source, &target).await?;
        debug!(remote_path, target = %target.display(), "uploaded file to local node");
        Ok(())
    }

    async fn download(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<(), ConnectorError> {
        let source = resolve(&self.root, remote_path)?;
        match tokio::fs::metadata(&source).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(ConnectorError::NotFound(remote_path.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConnectorError::NotFound(remote_path.to_string()));
            }
            Err(e) => return Err(ConnectorError::Io(e)),
        }
        copy_atomic(&source, destination).await?;
        debug!(remote_path, destination = %destination.display(), "downloaded file from local node");
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> Result<(), ConnectorError> {
        let target = resolve(&self.root, remote_path)?;
        remove_if_present(&target).await?;
        debug!(remote_path, "deleted file from local node");
        Ok(())
    }

    async fn probe(&self) -> bool {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        }
    }

    fn transport(&self) -> TransportType {
        TransportType::Local
    }

    fn address(&self) -> &str {
        &self.address
    }
}

// ---------------------------------------------------------------------------
// Shared directory helpers (also used by the node agent)
// ---------------------------------------------------------------------------

/// Map a logical path to its file under `root`.
pub(crate) fn resolve(root: &Path, remote_path: &str) -> Result<PathBuf, ConnectorError> {
    let location =
        location_for(remote_path).map_err(|e| ConnectorError::InvalidPath(e.to_string()))?;
    Ok(root.join(location))
}

/// A unique temporary sibling of `path`.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nonce: u64 = rand::random();
    path.with_file_name(format!(".{name}.{nonce:016x}.tmp"))
}

/// Publish a finished temp file at `path`, or remove it if writing failed.
async fn publish(
    tmp: &Path,
    path: &Path,
    written: std::io::Result<()>,
) -> Result<(), ConnectorError> {
    let result = match written {
        Ok(()) => tokio::fs::rename(tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        if let Err(cleanup) = tokio::fs::remove_file(tmp).await
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            warn!(tmp = %tmp.display(), %cleanup, "failed to remove temp file");
        }
        return Err(ConnectorError::Io(e));
    }
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<(), ConnectorError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Copy `source` to `target` through a temp file and rename.
pub(crate) async fn copy_atomic(source: &Path, target: &Path) -> Result<(), ConnectorError> {
    ensure_parent(target).await?;
    let tmp = temp_path(target);
    let written = tokio::fs::copy(source, &tmp).await.map(|_| ());
    publish(&tmp, target, written).await
}

/// Write `data` to `target` through a temp file and rename.
pub(crate) async fn write_atomic(target: &Path, data: &[u8]) -> Result<(), ConnectorError> {
    ensure_parent(target).await?;
    let tmp = temp_path(target);
    let written = tokio::fs::write(&tmp, data).await;
    publish(&tmp, target, written).await
}

/// Remove a file, treating an absent file as success.
pub(crate) async fn remove_if_present(path: &Path) -> Result<(), ConnectorError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ConnectorError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_connector() -> (LocalConnector, TempDir) {
        let dir = TempDir::new().unwrap();
        let connector = LocalConnector::create(dir.path().join("node")).unwrap();
        (connector, dir)
    }

    fn write_source(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let (connector, dir) = make_connector();
        let source = write_source(&dir, "in.bin", b"hello local node");

        connector.upload(&source, "docs/a.txt").await.unwrap();

        let out = dir.path().join("out.bin");
        connector.download("docs/a.txt", &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"hello local node");
    }

    #[tokio::test]
    async fn test_upload_places_file_under_root() {
        let (connector, dir) = make_connector();
        let source = write_source(&dir, "in.bin", b"layout");

        connector.upload(&source, "/nested/dir/file").await.unwrap();
        let expected = connector.root().join("nested/dir/file");
        assert_eq!(std::fs::read(expected).unwrap(), b"layout");
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let (connector, dir) = make_connector();
        let out = dir.path().join("out.bin");
        let result = connector.download("missing", &out).await;
        assert!(matches!(result, Err(ConnectorError::NotFound(_))));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (connector, dir) = make_connector();
        let source = write_source(&dir, "in.bin", b"bye");

        connector.upload(&source, "f").await.unwrap();
        connector.delete("f").await.unwrap();
        connector.delete("f").await.unwrap();
        assert!(!connector.root().join("f").exists());
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_nothing() {
        let (connector, dir) = make_connector();
        let missing_source = dir.path().join("does-not-exist");

        let result = connector.upload(&missing_source, "ghost").await;
        assert!(matches!(result, Err(ConnectorError::Io(_))));

        let leftovers: Vec<_> = std::fs::read_dir(connector.root())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_after_upload() {
        let (connector, dir) = make_connector();
        let source = write_source(&dir, "in.bin", b"atomic");

        connector.upload(&source, "atomic.txt").await.unwrap();
        let names: Vec<String> = std::fs::read_dir(connector.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["atomic.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_escaping_path() {
        let (connector, dir) = make_connector();
        let source = write_source(&dir, "in.bin", b"x");
        let result = connector.upload(&source, "../outside").await;
        assert!(matches!(result, Err(ConnectorError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_probe_reports_missing_root() {
        let dir = TempDir::new().unwrap();
        let connector = LocalConnector::new(dir.path().join("absent"));
        assert!(!connector.probe().await);

        let present = LocalConnector::new(dir.path());
        assert!(present.probe().await);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let (connector, dir) = make_connector();
        let first = write_source(&dir, "a", b"first");
        let second = write_source(&dir, "b", b"second version");

        connector.upload(&first, "f").await.unwrap();
        connector.upload(&second, "f").await.unwrap();

        let out = dir.path().join("out");
        connector.download("f", &out).await.unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"second version");
    }
}
