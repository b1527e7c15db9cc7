use anyhow::{Context, Result};
use config::{Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::dump::transfer::DEFAULT_BLOCK_SIZE;
use crate::ftp::connection::{DEFAULT_PORT, DEFAULT_TIMEOUT_SECS, DEFAULT_USERNAME};
use crate::ftp::RetryPolicy;

const APP_DIR: &str = "dump-runner-installer";
const FILE_STEM: &str = "installer";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP control server port
    pub port: u16,

    pub bind_address: String,

    /// Connection defaults for requests that leave fields out
    pub ftp: FtpSettings,

    pub scan: ScanSettings,

    pub transfer: TransferSettings,

    /// Lines kept for /api/logs
    pub log_buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpSettings {
    /// Empty means "ask"
    pub host: String,
    pub port: u16,
    pub username: String,
    pub passive_mode: bool,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub block_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8888,
            bind_address: "127.0.0.1".to_string(),
            ftp: FtpSettings::default(),
            scan: ScanSettings::default(),
            transfer: TransferSettings::default(),
            log_buffer_size: 1000,
        }
    }
}

impl Default for FtpSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            username: DEFAULT_USERNAME.to_string(),
            passive_mode: true,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_backoff_ms: 300,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl ScanSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl Config {
    /// Layered load: defaults, then `installer.toml` in the working
    /// directory, then the one in the user config directory, then
    /// `INSTALLER_*` variables (`INSTALLER_FTP__HOST` sets `ftp.host`).
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(ConfigFile::with_name(FILE_STEM).required(false));

        if let Some(path) = user_config_path() {
            builder = builder.add_source(ConfigFile::from(path).required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("INSTALLER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }
}

/// `<config dir>/dump-runner-installer/installer.toml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(format!("{}.toml", FILE_STEM)))
}

pub fn load_config() -> Result<Config> {
    Config::load()
}
