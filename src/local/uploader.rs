use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use tracing::{debug, info};

use super::error::LocalError;
use crate::dump::transfer::{self, ProgressReader, DEFAULT_BLOCK_SIZE};
use crate::dump::{CancelFlag, PayloadFiles, StorageLocation, TransferOutcome, TransferProgress};

/// Copies the payload pair into dumps on a mounted volume.
#[derive(Debug, Clone)]
pub struct LocalUploader {
    cancel: CancelFlag,
    block_size: usize,
}

impl Default for LocalUploader {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl LocalUploader {
    pub fn new(block_size: usize) -> Self {
        Self {
            cancel: CancelFlag::new(),
            block_size,
        }
    }

    pub fn cancel(&self) {
        info!("Local copy cancellation requested");
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

    pub fn transfer_to_location(
        &self,
        location: &StorageLocation,
        payload: &PayloadFiles,
        on_progress: &mut dyn FnMut(TransferProgress),
    ) -> TransferOutcome {
        let dest = Path::new(&location.path);
        let precheck = if !dest.exists() {
            Some(LocalError::DestinationMissing(dest.to_path_buf()))
        } else if !dest.is_dir() {
            Some(LocalError::NotADirectory(dest.to_path_buf()))
        } else {
            None
        };
        if let Some(err) = precheck {
            return TransferOutcome::failed(&location.path, err.to_string());
        }

        transfer::transfer_pair(
            location,
            payload,
            &self.cancel,
            |source, file_name| -> Result<u64, LocalError> {
                let target = dest.join(file_name);
                debug!("Copying {} to {}", source.display(), target.display());

                let bytes_total = fs::metadata(source)
                    .map_err(|e| LocalError::io(source, e))?
                    .len();
                let mut report = |bytes_sent: u64| {
                    on_progress(TransferProgress {
                        location_path: location.path.clone(),
                        file_name: file_name.to_string(),
                        bytes_sent,
                        bytes_total,
                    })
                };
                copy_preserving(source, &target, self.block_size, &mut report)
            },
        )
    }

    pub fn transfer_batch(
        &self,
        locations: &[StorageLocation],
        payload: &PayloadFiles,
        on_progress: &mut dyn FnMut(TransferProgress),
        on_complete: &mut dyn FnMut(&TransferOutcome),
    ) -> Vec<TransferOutcome> {
        info!("Copying to {} local locations", locations.len());
        transfer::run_batch(
            locations,
            &self.cancel,
            |location| self.transfer_to_location(location, payload, on_progress),
            on_complete,
        )
    }
}

/// Chunked copy that carries the source permissions and modification time
/// over to `target`.
fn copy_preserving(
    source: &Path,
    target: &Path,
    block_size: usize,
    on_chunk: &mut dyn FnMut(u64),
) -> Result<u64, LocalError> {
    let input = File::open(source).map_err(|e| LocalError::io(source, e))?;
    let metadata = input.metadata().map_err(|e| LocalError::io(source, e))?;

    let output = File::create(target).map_err(|e| LocalError::from_write(target, e))?;
    let mut writer = BufWriter::new(output);
    let mut reader = ProgressReader::new(input, block_size, on_chunk);

    let copied = io::copy(&mut reader, &mut writer).map_err(|e| LocalError::from_write(target, e))?;
    let output = writer
        .into_inner()
        .map_err(|e| LocalError::from_write(target, e.into_error()))?;
    output
        .sync_all()
        .map_err(|e| LocalError::from_write(target, e))?;

    if let Ok(modified) = metadata.modified() {
        if let Err(e) = output.set_modified(modified) {
            debug!("Could not keep mtime on {}: {}", target.display(), e);
        }
    }
    drop(output);
    if let Err(e) = fs::set_permissions(target, metadata.permissions()) {
        debug!("Could not keep permissions on {}: {}", target.display(), e);
    }

    Ok(copied)
}
