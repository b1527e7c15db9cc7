//! The slice of the FTP protocol the installer relies on, and the blocking
//! client that speaks it.

use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};
use thiserror::Error;
use tracing::debug;

use super::connection::ConnectionConfig;
use super::error::FtpError;

/// Failure of a single protocol command.
#[derive(Debug, Error)]
pub enum TransportError {
    /// 5xx reply. Servers use these both for "no such path" and for commands
    /// they don't implement.
    #[error("{code} {message}")]
    Permanent { code: u32, message: String },

    /// 1xx/4xx reply where a completion was expected.
    #[error("{code} {message}")]
    Transient { code: u32, message: String },

    /// Socket level failure.
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn permanent(code: u32, message: impl Into<String>) -> Self {
        TransportError::Permanent {
            code,
            message: message.into(),
        }
    }

    pub fn transient(code: u32, message: impl Into<String>) -> Self {
        TransportError::Transient {
            code,
            message: message.into(),
        }
    }

    /// Permission-class reply: path missing, not a directory, access denied
    /// or command unsupported. Never retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::Permanent { .. })
    }

    pub fn code(&self) -> Option<u32> {
        match self {
            TransportError::Permanent { code, .. } | TransportError::Transient { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// The server announced a data connection and then dropped it. Some
    /// consoles do this under load while the control channel stays fine.
    pub fn is_data_connection_hiccup(&self) -> bool {
        self.code() == Some(150)
    }

    /// The peer reset or aborted the connection.
    pub fn is_connection_reset(&self) -> bool {
        if let TransportError::Io(err) = self {
            if matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        let text = self.to_string();
        text.contains("10054") || text.contains("10053") || text.contains("forcibly closed")
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl From<suppaftp::FtpError> for TransportError {
    fn from(err: suppaftp::FtpError) -> Self {
        match err {
            suppaftp::FtpError::ConnectionError(e) => TransportError::Io(e),
            suppaftp::FtpError::UnexpectedResponse(response) => {
                let code = response.status.code();
                let message = String::from_utf8_lossy(&response.body).trim().to_string();
                if code >= 500 {
                    TransportError::Permanent { code, message }
                } else {
                    TransportError::Transient { code, message }
                }
            }
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// Commands the installer issues against a connected server.
///
/// Implementations are not re-entrant; callers hold `&mut` for the duration
/// of each command.
pub trait FtpTransport: Send {
    fn cwd(&mut self, path: &str) -> Result<(), TransportError>;

    fn pwd(&mut self) -> Result<String, TransportError>;

    /// NLST: bare names (or full paths, depending on the server).
    fn nlst(&mut self, path: &str) -> Result<Vec<String>, TransportError>;

    /// LIST of the current directory, one line per entry.
    fn list(&mut self, on_line: &mut dyn FnMut(&str)) -> Result<(), TransportError>;

    fn noop(&mut self) -> Result<(), TransportError>;

    /// STOR in binary mode. Returns the byte count written.
    fn store(&mut self, remote_path: &str, reader: &mut dyn Read) -> Result<u64, TransportError>;

    fn quit(&mut self) -> Result<(), TransportError>;

    /// Drop the connection without saying goodbye.
    fn close(&mut self);
}

/// Opens authenticated transports.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        config: &ConnectionConfig,
        password: &str,
    ) -> Result<Box<dyn FtpTransport>, FtpError>;
}

/// `suppaftp` backed client.
pub struct SuppaTransport {
    stream: Option<FtpStream>,
}

impl SuppaTransport {
    fn stream(&mut self) -> Result<&mut FtpStream, TransportError> {
        self.stream.as_mut().ok_or_else(|| {
            TransportError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "FTP stream already closed",
            ))
        })
    }
}

impl FtpTransport for SuppaTransport {
    fn cwd(&mut self, path: &str) -> Result<(), TransportError> {
        Ok(self.stream()?.cwd(path)?)
    }

    fn pwd(&mut self) -> Result<String, TransportError> {
        Ok(self.stream()?.pwd()?)
    }

    fn nlst(&mut self, path: &str) -> Result<Vec<String>, TransportError> {
        Ok(self.stream()?.nlst(Some(path))?)
    }

    fn list(&mut self, on_line: &mut dyn FnMut(&str)) -> Result<(), TransportError> {
        let lines = self.stream()?.list(None)?;
        for line in &lines {
            on_line(line);
        }
        Ok(())
    }

    fn noop(&mut self) -> Result<(), TransportError> {
        Ok(self.stream()?.noop()?)
    }

    fn store(&mut self, remote_path: &str, reader: &mut dyn Read) -> Result<u64, TransportError> {
        let mut reader = reader;
        Ok(self.stream()?.put_file(remote_path, &mut reader)?)
    }

    fn quit(&mut self) -> Result<(), TransportError> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.quit().map_err(TransportError::from),
            None => Ok(()),
        };
        self.stream = None;
        result
    }

    fn close(&mut self) {
        // Dropping the stream closes the control socket.
        self.stream = None;
    }
}

/// Default connector for real servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SuppaConnector;

impl SuppaConnector {
    fn resolve(config: &ConnectionConfig) -> Result<SocketAddr, FtpError> {
        (config.host(), config.port())
            .to_socket_addrs()
            .map_err(|e| FtpError::connection(config, TransportError::Io(e)))?
            .next()
            .ok_or_else(|| {
                FtpError::connection(
                    config,
                    TransportError::Protocol("host resolved to no addresses".to_string()),
                )
            })
    }
}

impl Connector for SuppaConnector {
    fn open(
        &self,
        config: &ConnectionConfig,
        password: &str,
    ) -> Result<Box<dyn FtpTransport>, FtpError> {
        let addr = Self::resolve(config)?;
        let timeout = Duration::from_secs(config.timeout_seconds());
        debug!("Connecting to {} (timeout {}s)", addr, config.timeout_seconds());

        let mut stream = FtpStream::connect_timeout(addr, timeout).map_err(|e| {
            let err = TransportError::from(e);
            if err.is_timeout() {
                FtpError::Timeout {
                    operation: "Connection".to_string(),
                    seconds: config.timeout_seconds(),
                }
            } else {
                FtpError::connection(config, err)
            }
        })?;

        stream.login(config.username(), password).map_err(|e| {
            let err = TransportError::from(e);
            if err.is_permanent() {
                FtpError::Authentication {
                    username: config.username().to_string(),
                    source: err,
                }
            } else {
                FtpError::connection(config, err)
            }
        })?;

        stream.set_mode(if config.passive_mode() {
            Mode::Passive
        } else {
            Mode::Active
        });
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| FtpError::connection(config, e.into()))?;

        Ok(Box::new(SuppaTransport {
            stream: Some(stream),
        }))
    }
}
