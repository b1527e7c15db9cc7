//! User-facing advice for failed operations.

use serde::Serialize;

use crate::ftp::FtpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// The session is gone; drop it and connect again.
    Reconnect,
    Retry,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Guidance {
    pub message: String,
    pub action: RecoveryAction,
}

impl Guidance {
    /// Whether the current session must be torn down before anything else.
    pub fn force_disconnect(&self) -> bool {
        self.action == RecoveryAction::Reconnect
    }
}

/// Read a scan failure by its signature.
pub fn for_scan_error(error: &str) -> Guidance {
    if error.contains("10061") || error.contains("Connection refused") || error.contains("Connection lost") {
        Guidance {
            message: "Connection refused. The FTP server may have disconnected. \
                      Check that the PS5 FTP server is still running and the console is \
                      still on the network, then reconnect."
                .to_string(),
            action: RecoveryAction::Reconnect,
        }
    } else if error.contains("10054") || error.contains("forcibly closed") {
        Guidance {
            message: "Connection was closed by the PS5. The FTP server may have timed out \
                      or been stopped. Reconnect and try again."
                .to_string(),
            action: RecoveryAction::Reconnect,
        }
    } else if error.to_lowercase().contains("timed out") {
        Guidance {
            message: "Connection timed out while scanning. The PS5 may be busy or the \
                      network is slow. Try scanning again."
                .to_string(),
            action: RecoveryAction::Retry,
        }
    } else {
        Guidance {
            message: format!("Failed to scan for game dumps: {}", error),
            action: RecoveryAction::None,
        }
    }
}

pub fn for_connect_error(error: &FtpError) -> Guidance {
    let (message, action) = match error {
        FtpError::Authentication { .. } => (
            "Authentication failed. Please check your username and password.".to_string(),
            RecoveryAction::None,
        ),
        FtpError::Timeout { .. } => (
            "Connection timed out. Is the PS5 FTP server running?".to_string(),
            RecoveryAction::Retry,
        ),
        FtpError::Connection { host, port, .. } => (
            format!(
                "Could not connect to {}:{}. Please check the address and ensure the PS5 FTP server is running.",
                host, port
            ),
            RecoveryAction::Retry,
        ),
        other => (format!("Connection failed: {}", other), RecoveryAction::None),
    };
    Guidance { message, action }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::TransportError;

    #[test]
    fn test_refused_and_lost_force_disconnect() {
        for text in [
            "[WinError 10061] No connection could be made",
            "Connection refused (os error 111)",
            "Connection lost - FTP server not responding: reset",
        ] {
            let guidance = for_scan_error(text);
            assert_eq!(guidance.action, RecoveryAction::Reconnect, "{}", text);
            assert!(guidance.force_disconnect());
        }
    }

    #[test]
    fn test_reset_forces_disconnect() {
        let guidance = for_scan_error("An existing connection was forcibly closed by the remote host");
        assert!(guidance.force_disconnect());
        assert!(guidance.message.starts_with("Connection was closed by the PS5"));
    }

    #[test]
    fn test_timeout_suggests_retry() {
        let guidance = for_scan_error("Scan Timed Out after 30 seconds");
        assert_eq!(guidance.action, RecoveryAction::Retry);
        assert!(!guidance.force_disconnect());
    }

    #[test]
    fn test_other_errors_pass_through() {
        let guidance = for_scan_error("disk on fire");
        assert_eq!(guidance.action, RecoveryAction::None);
        assert!(guidance.message.ends_with("disk on fire"));
    }

    #[test]
    fn test_connect_errors() {
        let auth = FtpError::Authentication {
            username: "anonymous".into(),
            source: TransportError::permanent(530, "Login incorrect"),
        };
        assert!(for_connect_error(&auth).message.starts_with("Authentication failed"));

        let refused = FtpError::Connection {
            host: "192.168.0.9".into(),
            port: 1337,
            source: TransportError::Protocol("refused".into()),
        };
        assert!(for_connect_error(&refused).message.contains("192.168.0.9:1337"));
    }
}
