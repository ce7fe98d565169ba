//! A [`Connector`] wrapper that injects failures and random latency.
//!
//! `FaultyConnector` wraps any `Arc<dyn Connector>`. Faults are configured
//! with the builder methods or toggled at runtime, so a test can register a
//! healthy node and break it later:
//!
//! ```ignore
//! let node = FaultyConnector::new(inner)
//!     .upload_latency(5, 20)        // 5 to 20 ms per upload
//!     .download_latency(50, 50)     // every download waits 50 ms
//!     .fail_delete_of("f2")         // deleting f2 fails
//!     .seed(42);
//! node.set_offline(true);           // probe now reports unreachable
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use quay_types::TransportType;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::ConnectorError;
use crate::traits::Connector;

#[derive(Debug, Default)]
struct Faults {
    uploads: bool,
    downloads: bool,
    all_deletes: bool,
    deletes: HashSet<String>,
    offline: bool,
    lost_upload_acks: bool,
}

/// A [`Connector`] wrapper for exercising failure paths.
pub struct FaultyConnector {
    inner: Arc<dyn Connector>,
    faults: Mutex<Faults>,
    upload_latency_ms: (u64, u64),
    download_latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
    upload_attempts: AtomicUsize,
}

impl FaultyConnector {
    /// Wrap an existing connector with no faults and no latency.
    pub fn new(inner: Arc<dyn Connector>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
            upload_latency_ms: (0, 0),
            download_latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            upload_attempts: AtomicUsize::new(0),
        }
    }

    /// Make every upload fail.
    pub fn fail_uploads(self) -> Self {
        self.set_fail_uploads(true);
        self
    }

    /// Make deletes of `remote_path` fail.
    pub fn fail_delete_of(self, remote_path: impl Into<String>) -> Self {
        self.set_fail_delete_of(remote_path, true);
        self
    }

    /// Set the upload latency range in milliseconds (uniform random).
    pub fn upload_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.upload_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the download latency range in milliseconds (uniform random).
    pub fn download_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.download_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed for deterministic latency.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Toggle upload failures.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.faults.lock().uploads = fail;
    }

    /// Toggle download failures.
    pub fn set_fail_downloads(&self, fail: bool) {
        self.faults.lock().downloads = fail;
    }

    /// Toggle failures for every delete.
    pub fn set_fail_all_deletes(&self, fail: bool) {
        self.faults.lock().all_deletes = fail;
    }

    /// Toggle delete failures for one remote path.
    pub fn set_fail_delete_of(&self, remote_path: impl Into<String>, fail: bool) {
        let path = remote_path.into();
        let mut faults = self.faults.lock();
        if fail {
            faults.deletes.insert(path);
        } else {
            faults.deletes.remove(&path);
        }
    }

    /// Toggle lost upload acknowledgements: the bytes are stored on the
    /// inner connector but the upload reports
    /// [`ConnectorError::Stranded`].
    pub fn set_lose_upload_acks(&self, lose: bool) {
        self.faults.lock().lost_upload_acks = lose;
    }

    /// Toggle whether probes report the node unreachable.
    ///
    /// An offline node also fails every transfer with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().offline = offline;
    }

    /// Number of uploads attempted through this wrapper.
    pub fn upload_count(&self) -> usize {
        self.upload_attempts.load(Ordering::Relaxed)
    }

    /// Remove every configured fault.
    pub fn heal(&self) {
        *self.faults.lock() = Faults::default();
    }

    fn check_online(&self) -> Result<(), ConnectorError> {
        if self.faults.lock().offline {
            return Err(ConnectorError::Connection(format!(
                "{} is offline",
                self.inner.address()
            )));
        }
        Ok(())
    }

    async fn delay(&self, (min, max): (u64, u64)) {
        if max == 0 {
            return;
        }
        let ms = if min == max {
            min
        } else {
            self.rng.lock().random_range(min..=max)
        };
        if ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl Connector for FaultyConnector {
    async fn upload(&self, source: &Path, remote_path: &str) -> Result<(), ConnectorError> {
        self.upload_attempts.fetch_add(1, Ordering::Relaxed);
        self.check_online()?;
        self.delay(self.upload_latency_ms).await;
        if self.faults.lock().uploads {
            return Err(ConnectorError::Injected(format!("upload of {remote_path}")));
        }
        self.inner.upload(source, remote_path).await?;
        if self.faults.lock().lost_upload_acks {
            return Err(ConnectorError::Stranded {
                path: remote_path.to_string(),
                cause: "injected lost acknowledgement".to_string(),
            });
        }
        Ok(())
    }

    async fn download(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<(), ConnectorError> {
        self.check_online()?;
        self.delay(self.download_latency_ms).await;
        if self.faults.lock().downloads {
            return Err(ConnectorError::Injected(format!(
                "download of {remote_path}"
            )));
        }
        self.inner.download(remote_path, destination).await
    }

    async fn delete(&self, remote_path: &str) -> Result<(), ConnectorError> {
        self.check_online()?;
        let fail = {
            let faults = self.faults.lock();
            faults.all_deletes || faults.deletes.contains(remote_path)
        };
        if fail {
            return Err(ConnectorError::Injected(format!("delete of {remote_path}")));
        }
        self.inner.delete(remote_path).await
    }

    async fn probe(&self) -> bool {
        if self.faults.lock().offline {
            return false;
        }
        self.inner.probe().await
    }

    fn transport(&self) -> TransportType {
        self.inner.transport()
    }

    fn address(&self) -> &str {
        self.inner.address()
    }
}
