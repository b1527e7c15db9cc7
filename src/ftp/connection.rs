use std::io::Read;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::FtpError;
use super::transport::{Connector, FtpTransport, SuppaConnector, TransportError};

pub const DEFAULT_PORT: u16 = 1337;
pub const DEFAULT_USERNAME: &str = "anonymous";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const MIN_TIMEOUT_SECS: u64 = 5;
pub const MAX_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Validated connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    username: String,
    passive_mode: bool,
    timeout_seconds: u64,
}

impl ConnectionConfig {
    /// Validates eagerly: an empty host, a port outside 1-65535 or a timeout
    /// outside 5-300 seconds is rejected.
    pub fn new(
        host: impl Into<String>,
        port: u32,
        username: impl Into<String>,
        passive_mode: bool,
        timeout_seconds: u64,
    ) -> Result<Self, FtpError> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(FtpError::InvalidConfig("Host is required".to_string()));
        }
        if !(1..=65535).contains(&port) {
            return Err(FtpError::InvalidConfig(format!(
                "Port must be between 1 and 65535, got {}",
                port
            )));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout_seconds) {
            return Err(FtpError::InvalidConfig(format!(
                "Timeout must be between {} and {}, got {}",
                MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, timeout_seconds
            )));
        }

        Ok(Self {
            host,
            port: port as u16,
            username: username.into(),
            passive_mode,
            timeout_seconds,
        })
    }

    /// Defaults for everything but the host.
    pub fn for_host(host: impl Into<String>) -> Result<Self, FtpError> {
        Self::new(
            host,
            DEFAULT_PORT as u32,
            DEFAULT_USERNAME,
            true,
            DEFAULT_TIMEOUT_SECS,
        )
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn passive_mode(&self) -> bool {
        self.passive_mode
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }
}

/// Owns the single FTP session and its lifecycle.
///
/// Nothing else keeps the transport: scanner and uploader borrow it through
/// [`ConnectionManager::session`] for one operation at a time, so a
/// disconnect is always seen by everybody.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn FtpTransport>>,
    config: Option<ConnectionConfig>,
    state: ConnectionState,
    connected_at: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_connector(Box::new(SuppaConnector))
    }

    pub fn with_connector(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            transport: None,
            config: None,
            state: ConnectionState::Disconnected,
            connected_at: None,
            last_activity: None,
            error_message: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.transport.is_some()
    }

    pub fn config(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Connect and log in. On failure the state is `Error` and no transport
    /// is kept.
    pub fn connect(&mut self, config: ConnectionConfig, password: &str) -> Result<(), FtpError> {
        if self.transport.is_some() {
            self.disconnect();
        }

        info!(
            "Connecting to {}:{} as {} (passive: {})",
            config.host(),
            config.port(),
            config.username(),
            config.passive_mode()
        );
        self.state = ConnectionState::Connecting;
        self.error_message = None;

        match self.connector.open(&config, password) {
            Ok(transport) => {
                let now = Utc::now();
                self.transport = Some(transport);
                self.state = ConnectionState::Connected;
                self.connected_at = Some(now);
                self.last_activity = Some(now);
                self.config = Some(config);
                info!("Connected");
                Ok(())
            }
            Err(e) => {
                warn!("Connection failed: {}", e);
                self.transport = None;
                self.state = ConnectionState::Error;
                self.error_message = Some(e.to_string());
                self.config = Some(config);
                Err(e)
            }
        }
    }

    /// Always ends disconnected. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.quit() {
                debug!("QUIT failed ({}), closing socket", e);
                transport.close();
            }
            info!("Disconnected");
        }
        self.state = ConnectionState::Disconnected;
        self.connected_at = None;
    }

    /// Mark the session dead after a failed keepalive.
    pub fn mark_lost(&mut self, reason: &str) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.state = ConnectionState::Error;
        self.connected_at = None;
        self.error_message = Some(reason.to_string());
    }

    /// Borrow the live transport for one operation.
    pub fn session(&mut self) -> Result<ActiveSession<'_>, FtpError> {
        if self.state != ConnectionState::Connected {
            return Err(FtpError::not_connected("FTP access"));
        }
        match self.transport.as_mut() {
            Some(transport) => Ok(ActiveSession {
                transport: transport.as_mut(),
                last_activity: &mut self.last_activity,
            }),
            None => Err(FtpError::not_connected("FTP access")),
        }
    }
}

/// A borrowed transport that stamps last-activity on every successful
/// command.
pub struct ActiveSession<'a> {
    transport: &'a mut dyn FtpTransport,
    last_activity: &'a mut Option<DateTime<Utc>>,
}

impl ActiveSession<'_> {
    fn touch<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if result.is_ok() {
            *self.last_activity = Some(Utc::now());
        }
        result
    }
}

impl FtpTransport for ActiveSession<'_> {
    fn cwd(&mut self, path: &str) -> Result<(), TransportError> {
        let result = self.transport.cwd(path);
        self.touch(result)
    }

    fn pwd(&mut self) -> Result<String, TransportError> {
        let result = self.transport.pwd();
        self.touch(result)
    }

    fn nlst(&mut self, path: &str) -> Result<Vec<String>, TransportError> {
        let result = self.transport.nlst(path);
        self.touch(result)
    }

    fn list(&mut self, on_line: &mut dyn FnMut(&str)) -> Result<(), TransportError> {
        let result = self.transport.list(on_line);
        self.touch(result)
    }

    fn noop(&mut self) -> Result<(), TransportError> {
        let result = self.transport.noop();
        self.touch(result)
    }

    fn store(&mut self, remote_path: &str, reader: &mut dyn Read) -> Result<u64, TransportError> {
        let result = self.transport.store(remote_path, reader);
        self.touch(result)
    }

    fn quit(&mut self) -> Result<(), TransportError> {
        self.transport.quit()
    }

    fn close(&mut self) {
        self.transport.close()
    }
}
