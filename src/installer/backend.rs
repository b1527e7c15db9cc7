use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::dump::{CancelFlag, PayloadFiles, StorageLocation, TransferOutcome, TransferProgress};
use crate::error::{Error, Result};
use crate::ftp::{ConnectionConfig, ConnectionManager, ConnectionState, DumpScanner, FtpUploader, RetryPolicy};
use crate::local::{LocalError, LocalScanner, LocalUploader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Remote,
    Local,
}

/// Snapshot of a backend for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    /// `host:port` or the volume path.
    pub target: String,
    pub connection_state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub last_scan: Option<DateTime<Utc>>,
    pub location_count: usize,
}

/// What the installer can do with a console or a mounted drive.
///
/// Every method blocks; callers run them on a worker thread.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    fn scan(&mut self) -> Result<Vec<StorageLocation>>;

    fn refresh(&mut self, path: &str) -> Result<StorageLocation>;

    /// Result of the last scan.
    fn locations(&self) -> Vec<StorageLocation>;

    fn transfer_batch(
        &mut self,
        locations: &[StorageLocation],
        payload: &PayloadFiles,
        on_progress: &mut dyn FnMut(TransferProgress),
        on_complete: &mut dyn FnMut(&TransferOutcome),
    ) -> Vec<TransferOutcome>;

    /// Handle that stops a running batch without locking the backend.
    fn cancel_flag(&self) -> CancelFlag;

    fn status(&self) -> BackendStatus;

    fn shutdown(&mut self);
}

pub struct RemoteBackend {
    conn: ConnectionManager,
    scanner: DumpScanner,
    uploader: FtpUploader,
}

impl RemoteBackend {
    /// Connect with the default `suppaftp` client.
    pub fn connect(
        config: ConnectionConfig,
        password: &str,
        policy: RetryPolicy,
        block_size: usize,
    ) -> Result<Self> {
        let mut conn = ConnectionManager::new();
        conn.connect(config, password)?;
        Ok(Self::with_connection(conn, policy, block_size))
    }

    pub fn with_connection(conn: ConnectionManager, policy: RetryPolicy, block_size: usize) -> Self {
        Self {
            conn,
            scanner: DumpScanner::new(policy),
            uploader: FtpUploader::new(block_size),
        }
    }

    pub fn with_scanner(mut self, scanner: DumpScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }
}

impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn scan(&mut self) -> Result<Vec<StorageLocation>> {
        Ok(self.scanner.scan(&mut self.conn)?)
    }

    fn refresh(&mut self, path: &str) -> Result<StorageLocation> {
        Ok(self.scanner.refresh(&mut self.conn, path)?)
    }

    fn locations(&self) -> Vec<StorageLocation> {
        self.scanner.locations().to_vec()
    }

    fn transfer_batch(
        &mut self,
        locations: &[StorageLocation],
        payload: &PayloadFiles,
        on_progress: &mut dyn FnMut(TransferProgress),
        on_complete: &mut dyn FnMut(&TransferOutcome),
    ) -> Vec<TransferOutcome> {
        self.uploader
            .transfer_batch(&mut self.conn, locations, payload, on_progress, on_complete)
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.uploader.cancel_flag()
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            kind: BackendKind::Remote,
            target: self
                .conn
                .config()
                .map(|c| format!("{}:{}", c.host(), c.port()))
                .unwrap_or_default(),
            connection_state: self.conn.state(),
            connected_at: self.conn.connected_at(),
            last_activity: self.conn.last_activity(),
            error_message: self.conn.error_message().map(str::to_string),
            last_scan: self.scanner.last_scan(),
            location_count: self.scanner.locations().len(),
        }
    }

    fn shutdown(&mut self) {
        self.conn.disconnect();
    }
}

pub struct LocalBackend {
    scanner: LocalScanner,
    uploader: LocalUploader,
    opened_at: DateTime<Utc>,
}

impl LocalBackend {
    pub fn open(volume: impl Into<PathBuf>, block_size: usize) -> Result<Self> {
        let volume = volume.into();
        if !volume.is_dir() {
            return Err(Error::Local(LocalError::VolumeMissing(volume)));
        }
        info!("Using local volume {}", volume.display());
        Ok(Self {
            scanner: LocalScanner::new(volume),
            uploader: LocalUploader::new(block_size),
            opened_at: Utc::now(),
        })
    }

    pub fn volume(&self) -> &Path {
        self.scanner.base()
    }
}

impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn scan(&mut self) -> Result<Vec<StorageLocation>> {
        Ok(self.scanner.scan())
    }

    fn refresh(&mut self, path: &str) -> Result<StorageLocation> {
        Ok(self.scanner.refresh(path))
    }

    fn locations(&self) -> Vec<StorageLocation> {
        self.scanner.locations().to_vec()
    }

    fn transfer_batch(
        &mut self,
        locations: &[StorageLocation],
        payload: &PayloadFiles,
        on_progress: &mut dyn FnMut(TransferProgress),
        on_complete: &mut dyn FnMut(&TransferOutcome),
    ) -> Vec<TransferOutcome> {
        self.uploader
            .transfer_batch(locations, payload, on_progress, on_complete)
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.uploader.cancel_flag()
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            kind: BackendKind::Local,
            target: self.volume().display().to_string(),
            connection_state: ConnectionState::Connected,
            connected_at: Some(self.opened_at),
            last_activity: self.scanner.last_scan().or(Some(self.opened_at)),
            error_message: None,
            last_scan: self.scanner.last_scan(),
            location_count: self.scanner.locations().len(),
        }
    }

    fn shutdown(&mut self) {
        info!("Releasing local volume {}", self.volume().display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::mock::{MockConnector, MockServer};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn remote(server: &MockServer) -> RemoteBackend {
        let mut conn = ConnectionManager::with_connector(Box::new(MockConnector::new(server)));
        conn.connect(ConnectionConfig::for_host("10.0.0.2").unwrap(), "").unwrap();
        let policy = RetryPolicy {
            retries: 1,
            backoff: Duration::from_millis(1),
        };
        RemoteBackend::with_connection(conn, policy, 8192)
            .with_scanner(DumpScanner::with_roots(policy, vec!["/data/homebrew/".to_string()]))
    }

    #[test]
    fn test_remote_backend_scan_and_status() {
        let server = MockServer::new();
        server.add_dir("/data/homebrew/GameA");
        let mut backend = remote(&server);

        let found = backend.scan().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(backend.locations(), found);

        let status = backend.status();
        assert_eq!(status.kind, BackendKind::Remote);
        assert_eq!(status.target, "10.0.0.2:1337");
        assert_eq!(status.connection_state, ConnectionState::Connected);
        assert_eq!(status.location_count, 1);

        backend.shutdown();
        assert_eq!(backend.status().connection_state, ConnectionState::Disconnected);
        assert!(matches!(backend.scan(), Err(Error::Ftp(_))));
    }

    #[test]
    fn test_local_backend_requires_directory() {
        let dir = TempDir::new().unwrap();
        assert!(LocalBackend::open(dir.path().join("missing"), 8192).is_err());

        fs::create_dir_all(dir.path().join("homebrew/Game")).unwrap();
        fs::write(dir.path().join("homebrew/Game/eboot.bin"), b"x").unwrap();
        let mut backend = LocalBackend::open(dir.path(), 8192).unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
        assert_eq!(backend.scan().unwrap().len(), 1);
        assert_eq!(backend.status().location_count, 1);
    }
}
