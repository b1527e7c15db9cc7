//! Directory probing against servers that drop data connections, reject
//! NLST, or both.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::listing::parse_list_line;
use super::transport::{FtpTransport, TransportError};
use crate::dump::paths::join_remote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    /// Missing, not a directory, or not readable.
    #[error("Cannot list '{path}': {source}")]
    Permission {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("Connection lost while listing '{path}': {source}")]
    ConnectionLost {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("Listing '{path}' failed after {attempts} attempts: {source}")]
    Transient {
        path: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

/// What the LIST fallback keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keep {
    Directories,
    Everything,
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryProber {
    policy: RetryPolicy,
}

impl DirectoryProber {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Whether `path` can be entered.
    ///
    /// A permanent reply means "no". Anything else is passed up so the caller
    /// can decide whether the session is still usable.
    pub fn exists(&self, ftp: &mut dyn FtpTransport, path: &str) -> Result<bool, TransportError> {
        let saved = ftp.pwd()?;
        let entered = enter(ftp, path);
        restore(ftp, &saved);

        match entered {
            Ok(()) => Ok(true),
            Err(e) if e.is_permanent() => {
                debug!("{} does not exist: {}", path, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Entries of a directory as NLST returns them. When NLST is rejected the
    /// LIST fallback yields full paths of subdirectories only.
    pub fn list_directory(
        &self,
        ftp: &mut dyn FtpTransport,
        path: &str,
    ) -> Result<Vec<String>, ProbeError> {
        self.list_with_retry(ftp, path, Keep::Directories)
    }

    /// Like [`list_directory`](Self::list_directory) but the fallback keeps
    /// files too.
    pub fn list_entries(
        &self,
        ftp: &mut dyn FtpTransport,
        path: &str,
    ) -> Result<Vec<String>, ProbeError> {
        self.list_with_retry(ftp, path, Keep::Everything)
    }

    fn list_with_retry(
        &self,
        ftp: &mut dyn FtpTransport,
        path: &str,
        keep: Keep,
    ) -> Result<Vec<String>, ProbeError> {
        let attempts = self.policy.retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match ftp.nlst(path) {
                Ok(names) => return Ok(names),
                Err(e) if e.is_permanent() => {
                    debug!("NLST {} rejected ({}), trying LIST", path, e);
                    match list_fallback(ftp, path, keep) {
                        Ok(entries) => return Ok(entries),
                        Err(fallback) if fallback.is_permanent() => {
                            return Err(ProbeError::Permission {
                                path: path.to_string(),
                                source: fallback,
                            });
                        }
                        Err(fallback) => fallback,
                    }
                }
                Err(e) => e,
            };

            if err.is_data_connection_hiccup() {
                debug!("Data connection dropped listing {} (attempt {}/{})", path, attempt, attempts);
            } else if err.is_connection_reset() {
                warn!("Connection reset listing {} (attempt {}/{})", path, attempt, attempts);
            } else {
                debug!("Listing {} failed (attempt {}/{}): {}", path, attempt, attempts, err);
            }

            if attempt >= attempts {
                return Err(ProbeError::Transient {
                    path: path.to_string(),
                    attempts,
                    source: err,
                });
            }

            if let Err(noop) = ftp.noop() {
                return Err(ProbeError::ConnectionLost {
                    path: path.to_string(),
                    source: noop,
                });
            }
            thread::sleep(self.policy.backoff);
        }
    }
}

/// PWD, walk into `path`, LIST, then put the working directory back.
fn list_fallback(
    ftp: &mut dyn FtpTransport,
    path: &str,
    keep: Keep,
) -> Result<Vec<String>, TransportError> {
    let saved = ftp.pwd()?;

    let mut entries = Vec::new();
    let result = enter(ftp, path).and_then(|()| {
        ftp.list(&mut |line| {
            if let Some(entry) = parse_list_line(line) {
                if entry.is_dir || keep == Keep::Everything {
                    entries.push(join_remote(path, &entry.name));
                }
            }
        })
    });

    restore(ftp, &saved);
    result.map(|()| entries)
}

/// Change into `path` one segment at a time. Names with spaces or brackets
/// survive this where a single CWD of the whole path does not on some
/// servers.
fn enter(ftp: &mut dyn FtpTransport, path: &str) -> Result<(), TransportError> {
    ftp.cwd("/")?;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        ftp.cwd(segment)?;
    }
    Ok(())
}

fn restore(ftp: &mut dyn FtpTransport, saved: &str) {
    if let Err(e) = ftp.cwd(saved) {
        debug!("Could not restore working directory {}: {}", saved, e);
    }
}
