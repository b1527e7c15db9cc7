use thiserror::Error;

use super::connection::ConnectionConfig;
use super::transport::TransportError;

/// Errors surfaced by the FTP side of the installer.
#[derive(Debug, Error)]
pub enum FtpError {
    #[error("Invalid connection settings: {0}")]
    InvalidConfig(String),

    #[error("Failed to connect to {host}:{port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: TransportError,
    },

    #[error("Authentication failed for user '{username}': {source}")]
    Authentication {
        username: String,
        #[source]
        source: TransportError,
    },

    #[error("{operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    #[error("{operation} requires an active FTP connection")]
    NotConnected { operation: String },

    /// The keepalive failed: the session is gone even though we never saw
    /// it close.
    #[error("Connection lost - FTP server not responding: {0}")]
    ConnectionLost(#[source] TransportError),

    #[error("Permission denied: cannot {operation} '{path}': {source}")]
    Permission {
        path: String,
        operation: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to {operation} path '{path}': {source}")]
    Path {
        path: String,
        operation: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to upload '{file_name}' to '{remote_path}': {source}")]
    Upload {
        file_name: String,
        remote_path: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to read '{path}': {source}")]
    LocalRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FtpError {
    pub(crate) fn connection(config: &ConnectionConfig, source: TransportError) -> Self {
        FtpError::Connection {
            host: config.host().to_string(),
            port: config.port(),
            source,
        }
    }

    pub(crate) fn not_connected(operation: &str) -> Self {
        FtpError::NotConnected {
            operation: operation.to_string(),
        }
    }

    /// True when the only way forward is a fresh connection.
    pub fn requires_reconnect(&self) -> bool {
        match self {
            FtpError::NotConnected { .. } | FtpError::ConnectionLost(_) => true,
            FtpError::Connection { source, .. } | FtpError::Path { source, .. } => {
                source.is_connection_reset()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = FtpError::not_connected("Scan");
        assert_eq!(err.to_string(), "Scan requires an active FTP connection");
        assert!(err.requires_reconnect());

        let err = FtpError::Timeout {
            operation: "Connection".into(),
            seconds: 30,
        };
        assert_eq!(err.to_string(), "Connection timed out after 30 seconds");
        assert!(!err.requires_reconnect());

        let err = FtpError::ConnectionLost(TransportError::transient(421, "closing"));
        assert!(err.to_string().starts_with("Connection lost"));
        assert!(err.requires_reconnect());
    }
}
