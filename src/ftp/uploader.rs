use std::fs::File;
use std::path::Path;

use tracing::{debug, info};

use super::connection::ConnectionManager;
use super::error::FtpError;
use super::transport::FtpTransport;
use crate::dump::transfer::{self, ProgressReader, DEFAULT_BLOCK_SIZE};
use crate::dump::{CancelFlag, PayloadFiles, StorageLocation, TransferOutcome, TransferProgress};

/// Streams the payload pair into dumps over the live FTP session.
#[derive(Debug, Clone)]
pub struct FtpUploader {
    cancel: CancelFlag,
    block_size: usize,
}

impl Default for FtpUploader {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl FtpUploader {
    pub fn new(block_size: usize) -> Self {
        Self {
            cancel: CancelFlag::new(),
            block_size,
        }
    }

    pub fn cancel(&self) {
        info!("Upload cancellation requested");
        self.cancel.cancel();
    }

    pub fn reset_cancel(&self) {
        self.cancel.reset();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Upload both files into one location. Never errors: a missing session
    /// or a failed STOR becomes a failed outcome.
    pub fn transfer_to_location(
        &self,
        conn: &mut ConnectionManager,
        location: &StorageLocation,
        payload: &PayloadFiles,
        on_progress: &mut dyn FnMut(TransferProgress),
    ) -> TransferOutcome {
        let mut ftp = match conn.session() {
            Ok(ftp) => ftp,
            Err(_) => {
                return TransferOutcome::failed(
                    &location.path,
                    FtpError::not_connected("Upload").to_string(),
                )
            }
        };

        transfer::transfer_pair(location, payload, &self.cancel, |source, file_name| {
            self.store_file(&mut ftp, location, source, file_name, on_progress)
        })
    }

    pub fn transfer_batch(
        &self,
        conn: &mut ConnectionManager,
        locations: &[StorageLocation],
        payload: &PayloadFiles,
        on_progress: &mut dyn FnMut(TransferProgress),
        on_complete: &mut dyn FnMut(&TransferOutcome),
    ) -> Vec<TransferOutcome> {
        info!("Uploading to {} locations", locations.len());
        transfer::run_batch(
            locations,
            &self.cancel,
            |location| self.transfer_to_location(conn, location, payload, on_progress),
            on_complete,
        )
    }

    fn store_file(
        &self,
        ftp: &mut dyn FtpTransport,
        location: &StorageLocation,
        source: &Path,
        file_name: &str,
        on_progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<u64, FtpError> {
        let local_read = |e: std::io::Error| FtpError::LocalRead {
            path: source.display().to_string(),
            source: e,
        };
        let file = File::open(source).map_err(local_read)?;
        let bytes_total = file.metadata().map_err(local_read)?.len();
        let remote_path = format!("{}/{}", location.path.trim_end_matches('/'), file_name);
        debug!("STOR {} ({} bytes)", remote_path, bytes_total);

        let mut report = |bytes_sent: u64| {
            on_progress(TransferProgress {
                location_path: location.path.clone(),
                file_name: file_name.to_string(),
                bytes_sent,
                bytes_total,
            })
        };
        let mut reader = ProgressReader::new(file, self.block_size, &mut report);

        ftp.store(&remote_path, &mut reader)
            .map_err(|source| FtpError::Upload {
                file_name: file_name.to_string(),
                remote_path,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::{ELF_FILE_NAME, JS_FILE_NAME};
    use crate::ftp::connection::ConnectionConfig;
    use crate::ftp::mock::{MockConnector, MockServer};
    use std::io::Write;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        payload: PayloadFiles,
    }

    fn payload(elf: &[u8], js: &[u8]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let elf_path = dir.path().join(ELF_FILE_NAME);
        let js_path = dir.path().join(JS_FILE_NAME);
        File::create(&elf_path).unwrap().write_all(elf).unwrap();
        File::create(&js_path).unwrap().write_all(js).unwrap();
        Fixture {
            payload: PayloadFiles::new(elf_path, js_path),
            _dir: dir,
        }
    }

    fn connected(server: &MockServer) -> ConnectionManager {
        let mut conn = ConnectionManager::with_connector(Box::new(MockConnector::new(server)));
        conn.connect(ConnectionConfig::for_host("10.0.0.2").unwrap(), "").unwrap();
        conn
    }

    fn locations(server: &MockServer) -> Vec<StorageLocation> {
        ["/data/homebrew/A", "/data/homebrew/B", "/mnt/usb0/homebrew/C"]
            .iter()
            .map(|p| {
                server.add_dir(p);
                StorageLocation::from_remote_path(p)
            })
            .collect()
    }

    #[test]
    fn test_upload_with_progress() {
        let server = MockServer::new();
        let mut conn = connected(&server);
        let fixture = payload(&vec![1u8; 10_000], b"console.log(1);");
        let targets = locations(&server);
        let target = &targets[0];
        let uploader = FtpUploader::default();

        let mut progress = Vec::new();
        let outcome = uploader.transfer_to_location(&mut conn, target, &fixture.payload, &mut |p| {
            progress.push(p)
        });

        assert!(outcome.success, "{:?}", outcome.error_message);
        assert!(outcome.elf_uploaded && outcome.js_uploaded);
        assert_eq!(outcome.bytes_transferred, 10_015);
        assert_eq!(server.uploaded("/data/homebrew/A/dump_runner.elf").unwrap().len(), 10_000);
        assert_eq!(server.uploaded("/data/homebrew/A/homebrew.js").unwrap(), b"console.log(1);");

        let elf: Vec<u64> = progress
            .iter()
            .filter(|p| p.file_name == ELF_FILE_NAME)
            .map(|p| p.bytes_sent)
            .collect();
        assert!(elf.windows(2).all(|w| w[1] > w[0] && w[1] - w[0] <= 8192));
        assert_eq!(elf.last(), Some(&10_000));
        assert!(progress.iter().all(|p| p.location_path == "/data/homebrew/A"));
    }

    #[test]
    fn test_zero_length_files() {
        let server = MockServer::new();
        let mut conn = connected(&server);
        let fixture = payload(b"", b"");
        let targets = locations(&server);
        let target = &targets[1];

        let outcome = FtpUploader::default().transfer_to_location(
            &mut conn,
            target,
            &fixture.payload,
            &mut |_| {},
        );
        assert!(outcome.success);
        assert_eq!(outcome.bytes_transferred, 0);
        assert_eq!(server.uploaded("/data/homebrew/B/homebrew.js"), Some(Vec::new()));
    }

    #[test]
    fn test_cancel_after_first_location() {
        let server = MockServer::new();
        let mut conn = connected(&server);
        let fixture = payload(b"elf", b"js");
        let targets = locations(&server);
        let uploader = FtpUploader::default();
        let flag = uploader.cancel_flag();
        server.clear_calls();

        let outcomes = uploader.transfer_batch(
            &mut conn,
            &targets,
            &fixture.payload,
            &mut |_| {},
            &mut |_| flag.cancel(),
        );

        assert!(outcomes[0].success);
        assert!(outcomes[1].is_cancelled());
        assert!(outcomes[2].is_cancelled());
        assert_eq!(server.count_calls("STOR"), 2);
        assert!(uploader.is_cancelled());

        uploader.reset_cancel();
        assert!(!uploader.is_cancelled());
    }

    #[test]
    fn test_partial_failure_continues_batch() {
        let server = MockServer::new();
        let mut conn = connected(&server);
        let fixture = payload(b"elf", b"js");
        let targets = locations(&server);
        server.with(|s| {
            s.store_failures.insert("/data/homebrew/B/homebrew.js".to_string());
        });

        let mut completed = Vec::new();
        let outcomes = FtpUploader::default().transfer_batch(
            &mut conn,
            &targets,
            &fixture.payload,
            &mut |_| {},
            &mut |o| completed.push(o.location_path.clone()),
        );

        assert_eq!(completed.len(), 3);
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(outcomes[1].elf_uploaded);
        assert!(!outcomes[1].js_uploaded);
        assert!(outcomes[1].error_message.as_deref().unwrap().contains("homebrew.js"));
        assert!(outcomes[2].success);
    }

    #[test]
    fn test_missing_local_file_fails_location() {
        let server = MockServer::new();
        let mut conn = connected(&server);
        let payload = PayloadFiles::new("/nonexistent/dump_runner.elf", "/nonexistent/homebrew.js");
        let targets = locations(&server);
        let target = &targets[0];

        let outcome =
            FtpUploader::default().transfer_to_location(&mut conn, target, &payload, &mut |_| {});
        assert!(!outcome.success);
        assert!(!outcome.elf_uploaded);
        assert_eq!(server.count_calls("STOR"), 0);
    }

    #[test]
    fn test_not_connected_is_failed_outcome() {
        let mut conn = ConnectionManager::new();
        let fixture = payload(b"elf", b"js");
        let target = StorageLocation::from_remote_path("/data/homebrew/A");

        let outcome = FtpUploader::default().transfer_to_location(
            &mut conn,
            &target,
            &fixture.payload,
            &mut |_| {},
        );
        assert!(!outcome.success);
        assert!(outcome.error_message.unwrap().contains("requires an active FTP connection"));
    }
}
