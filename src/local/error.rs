use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocalError {
    #[error("Destination folder does not exist: {}", .0.display())]
    DestinationMissing(PathBuf),

    #[error("Destination is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Permission denied: cannot write to {}. Please check folder permissions.", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Not enough space on drive to copy files")]
    DiskFull(PathBuf),

    #[error("Drive is read-only. Cannot write files.")]
    ReadOnly(PathBuf),

    #[error("Volume not available: {}", .0.display())]
    VolumeMissing(PathBuf),

    #[error("File system error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(unix)]
fn os_code_is_disk_full(code: i32) -> bool {
    code == libc::ENOSPC
}

#[cfg(unix)]
fn os_code_is_read_only(code: i32) -> bool {
    code == libc::EROFS
}

// ERROR_DISK_FULL, ERROR_HANDLE_DISK_FULL, ERROR_WRITE_PROTECT
#[cfg(windows)]
fn os_code_is_disk_full(code: i32) -> bool {
    code == 112 || code == 39
}

#[cfg(windows)]
fn os_code_is_read_only(code: i32) -> bool {
    code == 19
}

#[cfg(not(any(unix, windows)))]
fn os_code_is_disk_full(_code: i32) -> bool {
    false
}

#[cfg(not(any(unix, windows)))]
fn os_code_is_read_only(_code: i32) -> bool {
    false
}

impl LocalError {
    /// Sort a write failure into the cases users can act on.
    pub fn from_write(path: &Path, err: io::Error) -> Self {
        let text = err.to_string();
        let code = err.raw_os_error();

        if err.kind() == io::ErrorKind::PermissionDenied {
            LocalError::PermissionDenied(path.to_path_buf())
        } else if code.is_some_and(os_code_is_disk_full) || text.contains("No space left on device") {
            LocalError::DiskFull(path.to_path_buf())
        } else if code.is_some_and(os_code_is_read_only) || text.contains("Read-only file system") {
            LocalError::ReadOnly(path.to_path_buf())
        } else {
            LocalError::Io {
                path: path.to_path_buf(),
                source: err,
            }
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        LocalError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied() {
        let err = LocalError::from_write(
            Path::new("/x"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, LocalError::PermissionDenied(_)));
        assert!(err.to_string().starts_with("Permission denied"));
    }

    #[test]
    fn test_disk_full_by_message() {
        let err = LocalError::from_write(
            Path::new("/x"),
            io::Error::new(io::ErrorKind::Other, "No space left on device"),
        );
        assert!(matches!(err, LocalError::DiskFull(_)));
        assert_eq!(err.to_string(), "Not enough space on drive to copy files");
    }

    #[cfg(unix)]
    #[test]
    fn test_os_codes() {
        let full = LocalError::from_write(Path::new("/x"), io::Error::from_raw_os_error(libc::ENOSPC));
        assert!(matches!(full, LocalError::DiskFull(_)));

        let ro = LocalError::from_write(Path::new("/x"), io::Error::from_raw_os_error(libc::EROFS));
        assert!(matches!(ro, LocalError::ReadOnly(_)));
    }

    #[test]
    fn test_other_errors_keep_source() {
        let err = LocalError::from_write(
            Path::new("/x/y"),
            io::Error::new(io::ErrorKind::Other, "weird"),
        );
        assert!(matches!(err, LocalError::Io { .. }));
        assert!(err.to_string().contains("weird"));
    }
}
