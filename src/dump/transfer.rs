//! Backend-neutral halves of the transfer engine: the two-file sequence for
//! one location, and the batch loop around it.

use std::fmt::Display;
use std::io::{self, Read};
use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use super::{BatchSummary, CancelFlag, PayloadFiles, StorageLocation, TransferOutcome};
use super::{ELF_FILE_NAME, JS_FILE_NAME};

pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Reader that hands out at most `block_size` bytes per read and reports the
/// running total after each one.
pub struct ProgressReader<'a, R> {
    inner: R,
    block_size: usize,
    sent: u64,
    on_chunk: &'a mut dyn FnMut(u64),
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, block_size: usize, on_chunk: &'a mut dyn FnMut(u64)) -> Self {
        Self {
            inner,
            block_size: block_size.max(1),
            sent: 0,
            on_chunk,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = buf.len().min(self.block_size);
        let n = self.inner.read(&mut buf[..limit])?;
        if n > 0 {
            self.sent += n as u64;
            (self.on_chunk)(self.sent);
        }
        Ok(n)
    }
}

/// Install the ELF then the JS into one location.
///
/// `copy_file` gets the local source and the target file name and returns
/// the bytes written. The cancel flag is checked before each file; a file in
/// flight always finishes.
pub(crate) fn transfer_pair<E, F>(
    location: &StorageLocation,
    payload: &PayloadFiles,
    cancel: &CancelFlag,
    mut copy_file: F,
) -> TransferOutcome
where
    E: Display,
    F: FnMut(&Path, &str) -> Result<u64, E>,
{
    let started = Instant::now();
    let mut outcome = TransferOutcome::pending(&location.path);

    let files = [
        (payload.elf_path.as_path(), ELF_FILE_NAME),
        (payload.js_path.as_path(), JS_FILE_NAME),
    ];

    for (source, file_name) in files {
        if cancel.is_cancelled() {
            info!("Transfer to {} cancelled before {}", location.path, file_name);
            outcome.error_message = Some(super::CANCELLED_MESSAGE.to_string());
            outcome.duration_seconds = started.elapsed().as_secs_f64();
            return outcome;
        }

        match copy_file(source, file_name) {
            Ok(bytes) => {
                outcome.bytes_transferred += bytes;
                if file_name == ELF_FILE_NAME {
                    outcome.elf_uploaded = true;
                } else {
                    outcome.js_uploaded = true;
                }
            }
            Err(e) => {
                warn!("Failed to install {} into {}: {}", file_name, location.path, e);
                outcome.error_message = Some(e.to_string());
                outcome.duration_seconds = started.elapsed().as_secs_f64();
                return outcome;
            }
        }
    }

    outcome.success = true;
    outcome.duration_seconds = started.elapsed().as_secs_f64();
    info!(
        "Installed into {} ({} bytes in {:.2}s)",
        location.path, outcome.bytes_transferred, outcome.duration_seconds
    );
    outcome
}

/// Run `transfer_one` over every location in order.
///
/// Clears the cancel flag first. Once it is raised, every location not yet
/// started gets a cancelled outcome without any I/O. `on_complete` sees every
/// outcome, cancelled ones included.
pub(crate) fn run_batch<F>(
    locations: &[StorageLocation],
    cancel: &CancelFlag,
    mut transfer_one: F,
    on_complete: &mut dyn FnMut(&TransferOutcome),
) -> Vec<TransferOutcome>
where
    F: FnMut(&StorageLocation) -> TransferOutcome,
{
    cancel.reset();
    let mut outcomes = Vec::with_capacity(locations.len());

    for location in locations {
        let outcome = if cancel.is_cancelled() {
            TransferOutcome::cancelled(&location.path)
        } else {
            transfer_one(location)
        };
        on_complete(&outcome);
        outcomes.push(outcome);
    }

    let summary = BatchSummary::from_outcomes(&outcomes);
    info!(
        "Batch finished: {}/{} succeeded, {} bytes",
        summary.successful, summary.total, summary.bytes_transferred
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn payload() -> PayloadFiles {
        PayloadFiles::new("/tmp/dump_runner.elf", "/tmp/homebrew.js")
    }

    #[test]
    fn test_progress_reader_chunks() {
        let data = vec![7u8; 20_000];
        let mut seen = Vec::new();
        let mut on_chunk = |sent: u64| seen.push(sent);
        let mut reader = ProgressReader::new(Cursor::new(data), 8192, &mut on_chunk);

        let mut buf = [0u8; 65536];
        let mut total = 0;
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(reader.bytes_sent(), 20_000);
        drop(reader);
        assert_eq!(total, 20_000);
        assert_eq!(seen, vec![8192, 16384, 20_000]);
    }

    #[test]
    fn test_pair_success() {
        let location = StorageLocation::from_remote_path("/data/homebrew/G");
        let mut copied = Vec::new();
        let outcome = transfer_pair(&location, &payload(), &CancelFlag::new(), |_, name| {
            copied.push(name.to_string());
            Ok::<u64, String>(10)
        });
        assert!(outcome.success);
        assert!(outcome.elf_uploaded && outcome.js_uploaded);
        assert_eq!(outcome.bytes_transferred, 20);
        assert_eq!(copied, vec![ELF_FILE_NAME, JS_FILE_NAME]);
    }

    #[test]
    fn test_pair_failure_keeps_partial_flags() {
        let location = StorageLocation::from_remote_path("/data/homebrew/G");
        let outcome = transfer_pair(&location, &payload(), &CancelFlag::new(), |_, name| {
            if name == JS_FILE_NAME {
                Err("disk full".to_string())
            } else {
                Ok(5)
            }
        });
        assert!(!outcome.success);
        assert!(outcome.elf_uploaded);
        assert!(!outcome.js_uploaded);
        assert_eq!(outcome.bytes_transferred, 5);
        assert_eq!(outcome.error_message.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_pair_cancel_between_files() {
        let location = StorageLocation::from_remote_path("/data/homebrew/G");
        let cancel = CancelFlag::new();
        let outcome = transfer_pair(&location, &payload(), &cancel, |_, _| {
            cancel.cancel();
            Ok::<u64, String>(3)
        });
        assert!(outcome.is_cancelled());
        assert!(outcome.elf_uploaded);
        assert!(!outcome.js_uploaded);
    }

    #[test]
    fn test_batch_resets_flag_and_cancels_rest() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let locations: Vec<StorageLocation> = ["/a", "/b", "/c"]
            .iter()
            .map(|p| StorageLocation::from_remote_path(p))
            .collect();

        let mut started = 0;
        let mut completed = 0;
        let outcomes = run_batch(
            &locations,
            &cancel,
            |location| {
                started += 1;
                let mut outcome = TransferOutcome::pending(&location.path);
                outcome.success = true;
                outcome
            },
            &mut |_| {
                completed += 1;
                cancel.cancel();
            },
        );

        assert_eq!(started, 1);
        assert_eq!(completed, 3);
        assert!(outcomes[0].success);
        assert!(outcomes[1].is_cancelled());
        assert!(outcomes[2].is_cancelled());
    }
}
